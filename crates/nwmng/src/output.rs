//! Output formatting for the shell: tables, counters and notices.

use std::io::{self, IsTerminal, Write};

use owo_colors::OwoColorize;
use tabled::{Table, Tabled, settings::Style};

use nwmng_core::{Node, Notice, Stats};

use crate::cli::ColorMode;

/// Determine whether color output should be enabled.
pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

// ── Rows ─────────────────────────────────────────────────────────────

#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Address")]
    address: String,
    #[tabled(rename = "UUID")]
    uuid: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Provisioned")]
    provisioned: String,
}

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "UUID")]
    uuid: String,
    #[tabled(rename = "Template")]
    template: String,
    #[tabled(rename = "Blacklisted")]
    blacklisted: bool,
}

fn node_status(node: &Node) -> String {
    if node.rm_blacklist {
        return "removing".into();
    }
    match (node.configured, node.last_error) {
        (true, _) => "configured".into(),
        (false, Some(err)) => format!("failed: {} {} ({})", err.state, err.code, err.category),
        (false, None) => "configuring".into(),
    }
}

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn render_nodes(nodes: &[std::sync::Arc<Node>]) -> String {
    if nodes.is_empty() {
        return "no nodes".into();
    }
    let rows: Vec<NodeRow> = nodes
        .iter()
        .map(|n| NodeRow {
            address: n.address.to_string(),
            uuid: n.uuid.simple().to_string(),
            status: node_status(n),
            provisioned: n
                .provisioned_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default(),
        })
        .collect();
    render_table(&rows)
}

pub fn render_devices(devices: &[std::sync::Arc<Node>], empty: &str) -> String {
    if devices.is_empty() {
        return empty.into();
    }
    let rows: Vec<DeviceRow> = devices
        .iter()
        .map(|d| DeviceRow {
            uuid: d.uuid.simple().to_string(),
            template: d.template.map(|t| t.to_string()).unwrap_or_default(),
            blacklisted: d.rm_blacklist,
        })
        .collect();
    render_table(&rows)
}

pub fn render_stats(stats: &Stats) -> String {
    format!(
        "provisioned {} (failed {})\nconfigured  {} (failed {})\nremoved     {}",
        stats.prov_success, stats.prov_failed, stats.config_success, stats.config_failed, stats.removed
    )
}

/// One line per notice, or `None` for notices the shell keeps quiet about.
pub fn render_notice(notice: &Notice, color: bool) -> Option<String> {
    let (ok, text) = match notice {
        Notice::BacklogAdded { uuid } => (true, format!("backlog: {}", uuid.simple())),
        Notice::Provisioned { uuid, address } => {
            (true, format!("provisioned {} as {address}", uuid.simple()))
        }
        Notice::ProvisionFailed { uuid, reason } => (
            false,
            format!("provisioning {} failed (reason {reason})", uuid.simple()),
        ),
        Notice::FactoryResetRequired { uuid } => (
            false,
            format!("{} must be factory reset before it can be provisioned", uuid.simple()),
        ),
        Notice::Configured { address } => (true, format!("configured {address}")),
        Notice::ConfigFailed { address, error } => (
            false,
            format!("configuring {address} failed in {}: {}", error.state, error.code),
        ),
        Notice::Removed { address } => (true, format!("removed {address}")),
        Notice::RemoveFailed { address, error } => (
            false,
            format!("removing {address} failed in {}: {}", error.state, error.code),
        ),
        Notice::ProvisionerChanged(_) => return None,
        Notice::BootstrapFailed { reason } => (false, format!("bootstrap failed: {reason}")),
    };
    Some(match (color, ok) {
        (false, _) => text,
        (true, true) => text.green().to_string(),
        (true, false) => text.red().to_string(),
    })
}

/// Print to stdout, ignoring a closed pipe.
pub fn print_output(output: &str) {
    if output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use nwmng_core::Address;
    use uuid::Uuid;

    #[test]
    fn notices_render_without_color() {
        let line = render_notice(&Notice::Configured { address: Address(0x0101) }, false);
        assert_eq!(line.as_deref(), Some("configured 0x0101"));
        assert!(
            render_notice(
                &Notice::ProvisionerChanged(nwmng_core::ProvisionerConfig::default()),
                false
            )
            .is_none()
        );
    }

    #[test]
    fn node_table_lists_addresses() {
        let node = Node::new(Uuid::from_u128(1)).with_address(Address(0x0102));
        let out = render_nodes(&[std::sync::Arc::new(node)]);
        assert!(out.contains("0x0102"));
        assert!(out.contains("configuring"));
    }
}
