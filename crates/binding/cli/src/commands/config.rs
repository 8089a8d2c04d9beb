//! Configuration validation

use binding_service::BindingConfig;

use crate::output::{print_field, print_json, print_success};

/// Show the effective configuration. Loading already validated it.
pub fn execute(config: &BindingConfig, json: bool) -> anyhow::Result<()> {
    if json {
        return print_json(config);
    }

    print_field("Enabled", config.enabled);
    print_field(
        "Topic",
        if config.topic_id.is_empty() {
            "-"
        } else {
            config.topic_id.as_str()
        },
    );
    print_field("Network", config.network);
    print_field("Mirror", &config.mirror_url);
    print_field("Lookback", format!("{}h", config.lookback_hours));
    print_field(
        "Resync",
        match config.resync_interval() {
            Some(every) => format!("every {}s", every.as_secs()),
            None => "off".to_string(),
        },
    );
    print_field("Sampling", config.assert_sampling);
    print_field(
        "Polling",
        format!(
            "{} x {}ms",
            config.provision_poll_attempts, config.provision_poll_interval_ms
        ),
    );
    print_field(
        "DID salt",
        if config.did_salt.is_some() { "set" } else { "default" },
    );
    print_success("Configuration is valid");
    Ok(())
}
