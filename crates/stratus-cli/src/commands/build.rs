use super::{
    colorize_status, json_pretty, load_config, open_cloud, spin_fail, spin_ok, spinner,
    EXIT_FAILURE, EXIT_SUCCESS,
};
use std::path::Path;
use stratus_cache::ArtifactCache;
use stratus_core::{install_signal_handler, BuildSettings, BuildStatus, Builder};
use tracing::debug;

pub fn run(
    cache_dir: &Path,
    config_path: &Path,
    timeout: u64,
    no_wait: bool,
    json: bool,
) -> Result<u8, String> {
    let config = load_config(config_path)?;
    debug!("loaded {} ({} backend)", config_path.display(), config.cloud.backend);
    let cloud = open_cloud(&config)?;
    let cache = ArtifactCache::open(cache_dir).map_err(|e| format!("cache error: {e}"))?;
    let settings = BuildSettings::new(Builder::script_dir_for(config_path));
    let mut builder = Builder::new(config, cloud, cache, settings).map_err(|e| e.to_string())?;
    install_signal_handler(builder.abort_signal());

    let pb = (!json).then(|| spinner("staging install media and launching instance..."));
    if let Err(e) = builder.run() {
        if let Some(ref pb) = pb {
            spin_fail(pb, "launch failed");
        }
        builder.abort();
        return Err(e.to_string());
    }
    if let Some(ref pb) = pb {
        let id = builder
            .instance_id()
            .map_or_else(String::new, ToString::to_string);
        spin_ok(pb, &format!("install instance {id} launched"));
    }

    if no_wait {
        print_report(&builder, json)?;
        return Ok(EXIT_SUCCESS);
    }

    let pb = (!json).then(|| spinner("waiting for the installer to power off..."));
    let outcome = builder.wait_for_completion(timeout);
    let status = builder.status();
    match (&outcome, &pb) {
        (Ok(Some(image)), Some(pb)) => spin_ok(pb, &format!("image {image} created")),
        (Ok(None), Some(pb)) => spin_fail(pb, "install did not finish"),
        (Err(_), Some(pb)) => spin_fail(pb, "build failed"),
        (_, None) => {}
    }
    outcome.map_err(|e| e.to_string())?;

    print_report(&builder, json)?;
    Ok(if status == BuildStatus::Complete {
        EXIT_SUCCESS
    } else {
        EXIT_FAILURE
    })
}

fn print_report(builder: &Builder, json: bool) -> Result<(), String> {
    let report = builder.report();
    if json {
        println!("{}", json_pretty(&report)?);
        return Ok(());
    }
    println!(
        "{} ({}): {}",
        report.image_name,
        report.target,
        colorize_status(&report.status.to_string())
    );
    if let Some(id) = &report.instance_id {
        println!("instance: {id}");
    }
    if let Some(id) = &report.image_id {
        println!("image: {id}");
    }
    Ok(())
}
