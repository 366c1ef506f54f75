use crate::facade::{
    CloudFacade, Diagnostics, DiskFormat, FloatingIp, ImageRecord, ImageUpdate, KeyPair,
    LaunchSpec, RootDisk, SecurityGroupRule, ServerRecord, VolumeRecord,
};
use crate::CloudError;
use base64::Engine;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::thread;
use std::time::Duration;
use stratus_schema::{CloudSection, ImageId, SecurityGroupId, ServerId, VolumeId};
use tracing::{debug, warn};
use ureq::http::Response;
use ureq::{Body, SendBody};

/// Image fields owned by the image service; everything else is a property.
const GLANCE_CORE_FIELDS: &[&str] = &[
    "id",
    "name",
    "status",
    "visibility",
    "checksum",
    "container_format",
    "disk_format",
    "created_at",
    "updated_at",
    "min_disk",
    "min_ram",
    "owner",
    "protected",
    "size",
    "virtual_size",
    "tags",
    "file",
    "schema",
    "self",
    "direct_url",
    "locations",
    "os_hidden",
    "os_hash_algo",
    "os_hash_value",
];

const JSON_PATCH: &str = "application/openstack-images-v2.1-json-patch";

/// Empty disk the hypervisor attaches kernel/ramdisk properties to for
/// direct-boot launches.
const DIRECT_BOOT_STUB_BYTES: usize = 1 << 20;

const VOLUME_POLL_INTERVAL: Duration = Duration::from_secs(5);
const VOLUME_POLL_LIMIT: u32 = 720;

/// Endpoints and credentials for an OpenStack-style cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenStackConfig {
    pub compute_url: String,
    pub image_url: String,
    pub volume_url: String,
    pub token: String,
    pub floating_ip_pool: Option<String>,
    pub network_id: Option<String>,
    pub cdrom: bool,
}

impl OpenStackConfig {
    /// Build from the `[cloud]` section, reading the token from the
    /// environment variable it names.
    pub fn from_section(section: &CloudSection) -> Result<Self, CloudError> {
        fn endpoint(value: Option<&String>, field: &str) -> Result<String, CloudError> {
            value
                .map(|u| u.trim_end_matches('/').to_owned())
                .filter(|u| !u.is_empty())
                .ok_or_else(|| {
                    CloudError::Config(format!("cloud.{field} is required for the openstack backend"))
                })
        }
        let compute_url = endpoint(section.compute_url.as_ref(), "compute_url")?;
        let image_url = endpoint(section.image_url.as_ref(), "image_url")?;
        let volume_url = endpoint(section.volume_url.as_ref(), "volume_url")?;
        let token = std::env::var(&section.token_env).map_err(|_| {
            CloudError::Config(format!(
                "environment variable {} must hold an auth token",
                section.token_env
            ))
        })?;
        Ok(Self {
            compute_url,
            image_url,
            volume_url,
            token,
            floating_ip_pool: section.floating_ip_pool.clone(),
            network_id: section.network_id.clone(),
            cdrom: section.cdrom,
        })
    }
}

/// Blocking client for Nova (compute), Glance v2 (image) and Cinder (volume).
pub struct OpenStackCloud {
    config: OpenStackConfig,
    agent: ureq::Agent,
}

impl OpenStackCloud {
    pub fn new(config: OpenStackConfig) -> Self {
        let agent = ureq::Agent::new_with_defaults();
        Self { config, agent }
    }

    fn compute(&self, path: &str) -> String {
        format!("{}/{path}", self.config.compute_url)
    }

    fn image(&self, path: &str) -> String {
        format!("{}/v2/{path}", self.config.image_url)
    }

    fn volume(&self, path: &str) -> String {
        format!("{}/{path}", self.config.volume_url)
    }

    fn check(
        url: &str,
        result: Result<Response<Body>, ureq::Error>,
    ) -> Result<Response<Body>, CloudError> {
        match result {
            Ok(r) => Ok(r),
            Err(ureq::Error::StatusCode(404)) => Err(CloudError::NotFound(url.to_owned())),
            Err(ureq::Error::StatusCode(code)) => {
                Err(CloudError::Http(format!("HTTP {code} for {url}")))
            }
            Err(e) => Err(CloudError::Http(e.to_string())),
        }
    }

    fn read_json(resp: Response<Body>) -> Result<Value, CloudError> {
        let mut reader = resp.into_body().into_reader();
        let mut body = Vec::new();
        reader.read_to_end(&mut body)?;
        if body.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&body)?)
    }

    fn get_json(&self, url: &str) -> Result<Value, CloudError> {
        debug!("GET {url}");
        let result = self
            .agent
            .get(url)
            .header("X-Auth-Token", self.config.token.as_str())
            .header("Accept", "application/json")
            .call();
        Self::read_json(Self::check(url, result)?)
    }

    fn post_json(&self, url: &str, body: &Value) -> Result<Response<Body>, CloudError> {
        debug!("POST {url}");
        let data = serde_json::to_vec(body)?;
        let result = self
            .agent
            .post(url)
            .header("X-Auth-Token", self.config.token.as_str())
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .send(data.as_slice());
        Self::check(url, result)
    }

    fn patch(&self, url: &str, content_type: &str, body: &Value) -> Result<(), CloudError> {
        debug!("PATCH {url}");
        let data = serde_json::to_vec(body)?;
        let result = self
            .agent
            .patch(url)
            .header("X-Auth-Token", self.config.token.as_str())
            .header("Content-Type", content_type)
            .send(data.as_slice());
        Self::check(url, result)?;
        Ok(())
    }

    fn delete(&self, url: &str) -> Result<(), CloudError> {
        debug!("DELETE {url}");
        let result = self
            .agent
            .delete(url)
            .header("X-Auth-Token", self.config.token.as_str())
            .call();
        Self::check(url, result)?;
        Ok(())
    }

    fn server_action(&self, id: &ServerId, action: &Value) -> Result<Response<Body>, CloudError> {
        self.post_json(&self.compute(&format!("servers/{id}/action")), action)
    }

    /// Register an image record and stream `data` into it.
    fn create_image(
        &self,
        name: &str,
        disk_format: &str,
        container_format: &str,
        properties: &BTreeMap<String, String>,
        data: SendBody<'_>,
    ) -> Result<ImageId, CloudError> {
        let mut record = json!({
            "name": name,
            "disk_format": disk_format,
            "container_format": container_format,
            "visibility": "private",
        });
        for (k, v) in properties {
            record[k.as_str()] = json!(v);
        }
        let url = self.image("images");
        let created = Self::read_json(self.post_json(&url, &record)?)?;
        let id = ImageId::new(str_at(&created, "/id", &url)?);

        let file_url = self.image(&format!("images/{id}/file"));
        debug!("PUT {file_url}");
        let result = self
            .agent
            .put(&file_url)
            .header("X-Auth-Token", self.config.token.as_str())
            .header("Content-Type", "application/octet-stream")
            .send(data);
        Self::check(&file_url, result)?;
        Ok(id)
    }

    fn upload_file(
        &self,
        name: &str,
        path: &Path,
        disk_format: &str,
        container_format: &str,
    ) -> Result<ImageId, CloudError> {
        let mut file = File::open(path)?;
        self.create_image(
            name,
            disk_format,
            container_format,
            &BTreeMap::new(),
            SendBody::from_reader(&mut file),
        )
    }

    /// Nova has no launch parameters for a kernel; direct boot hangs the
    /// kernel, ramdisk and command line off the boot image instead.
    fn direct_boot_image(&self, spec: &LaunchSpec) -> Result<Option<ImageId>, CloudError> {
        let Some(boot) = &spec.direct_boot else {
            return Ok(None);
        };
        let mut properties = BTreeMap::new();
        properties.insert("kernel_id".to_owned(), boot.kernel.to_string());
        properties.insert("ramdisk_id".to_owned(), boot.ramdisk.to_string());
        properties.insert("os_command_line".to_owned(), boot.command_line.clone());
        let zeros = vec![0u8; DIRECT_BOOT_STUB_BYTES];
        let mut reader = zeros.as_slice();
        let id = self.create_image(
            &format!("{}-direct-boot", spec.name),
            "raw",
            "bare",
            &properties,
            SendBody::from_reader(&mut reader),
        )?;
        Ok(Some(id))
    }

    fn flavor_ref(&self, flavor: &str) -> Result<String, CloudError> {
        let url = self.compute("flavors");
        let listing = self.get_json(&url)?;
        listing
            .get("flavors")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .find(|f| f["id"] == flavor || f["name"] == flavor)
            .and_then(|f| id_string(&f["id"]))
            .ok_or_else(|| CloudError::Config(format!("unknown flavor '{flavor}'")))
    }

    fn block_devices(spec: &LaunchSpec, boot_image: Option<&ImageId>) -> Vec<Value> {
        let size = spec.root_disk.size_gb();
        let image = match &spec.root_disk {
            RootDisk::Image { image, .. } => Some(image),
            RootDisk::Blank { .. } => boot_image,
        };
        // A blank disk cannot boot, so the installer ISO goes first.
        let iso_first = image.is_none() && spec.install_iso.is_some();
        let mut root = match image {
            Some(image) => json!({
                "source_type": "image",
                "uuid": image,
                "destination_type": "volume",
                "volume_size": size,
                "delete_on_termination": true,
            }),
            None => json!({
                "source_type": "blank",
                "destination_type": "volume",
                "volume_size": size,
                "delete_on_termination": true,
            }),
        };
        root["boot_index"] = json!(if iso_first { 1 } else { 0 });
        let mut devices = vec![root];
        if let Some(iso) = &spec.install_iso {
            devices.push(json!({
                "boot_index": if iso_first { 0 } else { 1 },
                "source_type": "volume",
                "uuid": iso,
                "destination_type": "volume",
                "device_type": "cdrom",
                "disk_bus": "ide",
                "delete_on_termination": false,
            }));
        }
        devices
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_at<'a>(value: &'a Value, pointer: &str, endpoint: &str) -> Result<&'a Value, CloudError> {
    value.pointer(pointer).ok_or_else(|| CloudError::Response {
        endpoint: endpoint.to_owned(),
        reason: format!("missing {pointer}"),
    })
}

fn str_at(value: &Value, pointer: &str, endpoint: &str) -> Result<String, CloudError> {
    id_string(value_at(value, pointer, endpoint)?).ok_or_else(|| CloudError::Response {
        endpoint: endpoint.to_owned(),
        reason: format!("{pointer} is not a string"),
    })
}

impl CloudFacade for OpenStackCloud {
    fn name(&self) -> &'static str {
        "openstack"
    }

    fn servers_get(&self, id: &ServerId) -> Result<ServerRecord, CloudError> {
        let url = self.compute(&format!("servers/{id}"));
        let body = self.get_json(&url)?;
        Ok(ServerRecord {
            id: ServerId::new(str_at(&body, "/server/id", &url)?),
            name: str_at(&body, "/server/name", &url)?,
            status: str_at(&body, "/server/status", &url)?,
        })
    }

    fn servers_create(&self, spec: &LaunchSpec) -> Result<ServerRecord, CloudError> {
        if spec.install_iso.is_some() && !self.config.cdrom {
            return Err(CloudError::Unsupported {
                backend: "openstack".to_owned(),
                operation: "cdrom block device mapping".to_owned(),
            });
        }
        let flavor = self.flavor_ref(&spec.flavor)?;
        let boot_image = self.direct_boot_image(spec)?;
        let mut server = json!({
            "name": spec.name,
            "flavorRef": flavor,
            "block_device_mapping_v2": Self::block_devices(spec, boot_image.as_ref()),
        });
        if let Some(data) = &spec.user_data {
            server["user_data"] = json!(base64::engine::general_purpose::STANDARD.encode(data));
        }
        if let Some(key) = &spec.key_name {
            server["key_name"] = json!(key);
        }
        if let Some(net) = spec.network_id.as_ref().or(self.config.network_id.as_ref()) {
            server["networks"] = json!([{ "uuid": net }]);
        }

        let url = self.compute("servers");
        let created = Self::read_json(self.post_json(&url, &json!({ "server": server }))?)?;
        Ok(ServerRecord {
            id: ServerId::new(str_at(&created, "/server/id", &url)?),
            name: spec.name.clone(),
            status: "BUILD".to_owned(),
        })
    }

    fn servers_diagnostics(&self, id: &ServerId) -> Result<Diagnostics, CloudError> {
        let url = self.compute(&format!("servers/{id}/diagnostics"));
        match self.get_json(&url)? {
            Value::Object(map) => Ok(map.into_iter().collect()),
            Value::Null => Ok(Diagnostics::new()),
            other => Err(CloudError::Response {
                endpoint: url,
                reason: format!("expected an object, got {other}"),
            }),
        }
    }

    fn servers_stop(&self, id: &ServerId) -> Result<(), CloudError> {
        self.server_action(id, &json!({ "os-stop": null }))?;
        Ok(())
    }

    fn servers_delete(&self, id: &ServerId) -> Result<(), CloudError> {
        self.delete(&self.compute(&format!("servers/{id}")))
    }

    fn servers_create_image(&self, id: &ServerId, name: &str) -> Result<ImageId, CloudError> {
        let resp = self.server_action(id, &json!({ "createImage": { "name": name } }))?;
        // Older compute APIs only report the new image in the Location header.
        let location = resp
            .headers()
            .get("location")
            .and_then(|v| v.to_str().ok())
            .and_then(|l| l.rsplit('/').next())
            .map(str::to_owned);
        let body = Self::read_json(resp)?;
        body.get("image_id")
            .and_then(id_string)
            .or(location)
            .map(ImageId::new)
            .ok_or_else(|| CloudError::Response {
                endpoint: format!("servers/{id}/action"),
                reason: "createImage returned no image id".to_owned(),
            })
    }

    fn servers_add_floating_ip(&self, id: &ServerId, address: &str) -> Result<(), CloudError> {
        self.server_action(id, &json!({ "addFloatingIp": { "address": address } }))?;
        Ok(())
    }

    fn servers_remove_floating_ip(&self, id: &ServerId, address: &str) -> Result<(), CloudError> {
        self.server_action(id, &json!({ "removeFloatingIp": { "address": address } }))?;
        Ok(())
    }

    fn servers_add_security_group(
        &self,
        id: &ServerId,
        group: &SecurityGroupId,
    ) -> Result<(), CloudError> {
        self.server_action(id, &json!({ "addSecurityGroup": { "name": group } }))?;
        Ok(())
    }

    fn servers_remove_security_group(
        &self,
        id: &ServerId,
        group: &SecurityGroupId,
    ) -> Result<(), CloudError> {
        self.server_action(id, &json!({ "removeSecurityGroup": { "name": group } }))?;
        Ok(())
    }

    fn floating_ips_create(&self, pool: Option<&str>) -> Result<FloatingIp, CloudError> {
        let url = self.compute("os-floating-ips");
        let pool = pool.or(self.config.floating_ip_pool.as_deref());
        let body = match pool {
            Some(pool) => json!({ "pool": pool }),
            None => json!({}),
        };
        let created = Self::read_json(self.post_json(&url, &body)?)?;
        Ok(FloatingIp {
            id: str_at(&created, "/floating_ip/id", &url)?,
            address: str_at(&created, "/floating_ip/ip", &url)?,
        })
    }

    fn floating_ips_delete(&self, ip: &FloatingIp) -> Result<(), CloudError> {
        self.delete(&self.compute(&format!("os-floating-ips/{}", ip.id)))
    }

    fn volumes_get(&self, id: &VolumeId) -> Result<VolumeRecord, CloudError> {
        let url = self.volume(&format!("volumes/{id}"));
        let body = self.get_json(&url)?;
        Ok(VolumeRecord {
            id: VolumeId::new(str_at(&body, "/volume/id", &url)?),
            name: body
                .pointer("/volume/name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            status: str_at(&body, "/volume/status", &url)?,
            size_gb: value_at(&body, "/volume/size", &url)?.as_u64().unwrap_or(0),
        })
    }

    fn volumes_create_from_file(&self, name: &str, path: &Path) -> Result<VolumeId, CloudError> {
        let len = std::fs::metadata(path)?.len();
        let staging = self.upload_file(&format!("{name}-staging"), path, "iso", "bare")?;

        let url = self.volume("volumes");
        let request = json!({
            "volume": {
                "name": name,
                "size": len.div_ceil(1 << 30).max(1),
                "imageRef": staging,
            }
        });
        let created = Self::read_json(self.post_json(&url, &request)?)?;
        let id = VolumeId::new(str_at(&created, "/volume/id", &url)?);

        let mut ready = false;
        for _ in 0..VOLUME_POLL_LIMIT {
            match self.volumes_get(&id) {
                Ok(v) if v.status == "available" => {
                    ready = true;
                    break;
                }
                Ok(v) if v.status == "error" => {
                    return Err(CloudError::Backend(format!("volume {id} entered error state")));
                }
                Ok(v) => debug!("volume {id} is {}", v.status),
                Err(e) => debug!("volume {id} not readable yet: {e}"),
            }
            thread::sleep(VOLUME_POLL_INTERVAL);
        }
        if let Err(e) = self.delete(&self.image(&format!("images/{staging}"))) {
            warn!("failed to delete staging image {staging}: {e}");
        }
        if !ready {
            return Err(CloudError::Backend(format!(
                "volume {id} did not become available"
            )));
        }
        Ok(id)
    }

    fn volumes_delete(&self, id: &VolumeId) -> Result<(), CloudError> {
        self.delete(&self.volume(&format!("volumes/{id}")))
    }

    fn images_get(&self, id: &ImageId) -> Result<ImageRecord, CloudError> {
        let url = self.image(&format!("images/{id}"));
        let body = self.get_json(&url)?;
        let properties = body
            .as_object()
            .into_iter()
            .flatten()
            .filter(|(k, _)| !GLANCE_CORE_FIELDS.contains(&k.as_str()))
            .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_owned())))
            .collect();
        Ok(ImageRecord {
            id: ImageId::new(str_at(&body, "/id", &url)?),
            name: body
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            status: str_at(&body, "/status", &url)?,
            public: body.get("visibility").and_then(Value::as_str) == Some("public"),
            properties,
        })
    }

    fn images_upload(
        &self,
        name: &str,
        path: &Path,
        format: DiskFormat,
    ) -> Result<ImageId, CloudError> {
        self.upload_file(name, path, format.as_str(), format.container_format())
    }

    fn images_update(&self, id: &ImageId, update: &ImageUpdate) -> Result<(), CloudError> {
        if update.is_empty() {
            return Ok(());
        }
        let mut ops = Vec::new();
        if let Some(public) = update.public {
            ops.push(json!({
                "op": "replace",
                "path": "/visibility",
                "value": if public { "public" } else { "private" },
            }));
        }
        for key in &update.remove_properties {
            ops.push(json!({ "op": "remove", "path": format!("/{key}") }));
        }
        for (key, value) in &update.set_properties {
            ops.push(json!({ "op": "add", "path": format!("/{key}"), "value": value }));
        }
        self.patch(&self.image(&format!("images/{id}")), JSON_PATCH, &Value::Array(ops))
    }

    fn security_groups_create(
        &self,
        name: &str,
        description: &str,
    ) -> Result<SecurityGroupId, CloudError> {
        let url = self.compute("os-security-groups");
        let body = json!({ "security_group": { "name": name, "description": description } });
        let created = Self::read_json(self.post_json(&url, &body)?)?;
        Ok(SecurityGroupId::new(str_at(&created, "/security_group/id", &url)?))
    }

    fn security_groups_delete(&self, id: &SecurityGroupId) -> Result<(), CloudError> {
        self.delete(&self.compute(&format!("os-security-groups/{id}")))
    }

    fn security_group_rules_create(
        &self,
        group: &SecurityGroupId,
        rule: &SecurityGroupRule,
    ) -> Result<(), CloudError> {
        let body = json!({
            "security_group_rule": {
                "parent_group_id": group,
                "ip_protocol": rule.protocol,
                "from_port": rule.from_port,
                "to_port": rule.to_port,
                "cidr": rule.cidr,
            }
        });
        self.post_json(&self.compute("os-security-group-rules"), &body)?;
        Ok(())
    }

    fn keypairs_create(&self, name: &str) -> Result<KeyPair, CloudError> {
        let url = self.compute("os-keypairs");
        let created = Self::read_json(self.post_json(&url, &json!({ "keypair": { "name": name } }))?)?;
        Ok(KeyPair {
            name: str_at(&created, "/keypair/name", &url)?,
            public_key: str_at(&created, "/keypair/public_key", &url)?,
            private_key: created
                .pointer("/keypair/private_key")
                .and_then(Value::as_str)
                .map(str::to_owned),
        })
    }

    fn keypairs_delete(&self, name: &str) -> Result<(), CloudError> {
        self.delete(&self.compute(&format!("os-keypairs/{name}")))
    }

    fn supports_cdrom(&self) -> bool {
        self.config.cdrom
    }
}
