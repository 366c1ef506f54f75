use super::{colorize_status, json_pretty, load_config, open_cloud, EXIT_SUCCESS};
use std::path::Path;
use std::sync::Arc;
use stratus_core::{AbortSignal, Instance, InstanceContext, InstanceSettings, SystemClock};
use stratus_schema::ServerId;

pub fn run(config_path: &Path, server_id: &str, json: bool) -> Result<u8, String> {
    let config = load_config(config_path)?;
    let ctx = InstanceContext {
        cloud: open_cloud(&config)?,
        clock: Arc::new(SystemClock),
        settings: InstanceSettings::from_config(&config),
        abort: AbortSignal::new(),
    };
    let instance = Instance::attach(ctx, ServerId::new(server_id), config.install.direct_boot);
    let record = instance.status().map_err(|e| e.to_string())?;
    let activity = instance.get_disk_and_net_activity().ok();

    if json {
        let payload = serde_json::json!({
            "id": record.id,
            "name": record.name,
            "status": record.status,
            "disk": activity.map(|a| a.disk),
            "net": activity.map(|a| a.net),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("{} ({}): {}", record.name, record.id, colorize_status(&record.status));
        match activity {
            Some(a) => println!("disk: {} bytes, net: {} bytes", a.disk, a.net),
            None => println!("diagnostics unavailable"),
        }
    }
    Ok(EXIT_SUCCESS)
}
