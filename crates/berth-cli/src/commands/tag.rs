use super::RefArgs;
use berth_build::vcs::RefSource;
use berth_core::BerthConfig;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct TagReport {
    image: String,
    tag: String,
    tagged: bool,
    cache_key: String,
    source: &'static str,
}

/// Print the image identifier and cache key the current ref resolves to.
pub fn tag(refs: &RefArgs, json: bool) -> anyhow::Result<()> {
    let project_dir = PathBuf::from(".");
    let config = BerthConfig::load(&project_dir)?;
    let name = super::workload_name(&project_dir, &config)?;
    let target = super::resolve_target(&project_dir, &config, &name, refs)?;

    let report = TagReport {
        image: target.image.to_string(),
        tag: target.image.tag.clone(),
        tagged: target.release.is_tagged(),
        cache_key: target.scope.key.clone(),
        source: match target.source {
            RefSource::Override => "override",
            RefSource::Ci => "ci",
            RefSource::Git => "git",
        },
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.image);
        println!("cache key: {} (ref from {})", report.cache_key, report.source);
    }
    Ok(())
}
