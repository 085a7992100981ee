//! Terminal rendering for toasts, tables, and connection status.

use comfy_table::{presets::UTF8_FULL_CONDENSED, Table};
use console::style;

use toolhub_client::{ConnectionState, Notification};
use toolhub_protocol::{
    AdminStats, Severity, StoredNotification, SystemStatus, Tool, ToolsPage, User,
};

pub fn severity_badge(severity: Severity) -> String {
    let label = format!(" {:<7} ", severity.as_str().to_uppercase());
    match severity {
        Severity::Info => style(label).white().on_blue().to_string(),
        Severity::Success => style(label).black().on_green().to_string(),
        Severity::Warning => style(label).black().on_yellow().to_string(),
        Severity::Error => style(label).white().on_red().bold().to_string(),
    }
}

pub fn toast_line(notification: &Notification) -> String {
    let lifetime = match notification.duration_ms {
        Some(ms) if ms > 0 => format!("{:.1}s", ms as f64 / 1000.0),
        _ => "sticky".to_string(),
    };
    format!(
        "{} {} {}",
        severity_badge(notification.severity),
        notification.message,
        style(format!("({lifetime})")).dim()
    )
}

pub fn dismissed_line(message: &str) -> String {
    style(format!("  ✕ {message}")).dim().to_string()
}

pub fn state_line(state: ConnectionState) -> String {
    let text = match state {
        ConnectionState::Idle => style("● offline").red(),
        ConnectionState::Connecting => style("● connecting").yellow(),
        ConnectionState::Open => style("● live").green(),
        ConnectionState::Retrying => style("● reconnecting").yellow(),
    };
    text.to_string()
}

fn table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table
}

pub fn user_table(user: &User) -> Table {
    let mut table = table();
    table.set_header(vec!["ID", "Name", "Email", "Role", "Status"]);
    table.add_row(vec![
        user.id.clone(),
        user.name.clone(),
        user.email.clone(),
        format!("{:?}", user.role).to_lowercase(),
        format!("{:?}", user.status).to_lowercase(),
    ]);
    table
}

pub fn tools_table(page: &ToolsPage) -> Table {
    let mut table = table();
    table.set_header(vec!["ID", "Title", "Category", "Public", "Uses"]);
    for tool in &page.tools {
        table.add_row(vec![
            tool.id.clone(),
            tool.title.clone(),
            tool.category.clone(),
            if tool.is_public { "yes" } else { "no" }.to_string(),
            tool.usage_count.to_string(),
        ]);
    }
    table
}

pub fn tool_inputs_table(tool: &Tool) -> Table {
    let mut table = table();
    table.set_header(vec!["Input", "Type", "Label", "Required", "Options"]);
    for field in &tool.input_fields {
        table.add_row(vec![
            field.name.clone(),
            format!("{:?}", field.kind).to_lowercase(),
            field.label.clone(),
            if field.required { "yes" } else { "" }.to_string(),
            field.options.as_deref().unwrap_or_default().join(", "),
        ]);
    }
    table
}

pub fn stats_table(stats: &AdminStats) -> Table {
    let mut table = table();
    table.set_header(vec!["Users", "Active", "Tools", "Executions"]);
    table.add_row(vec![
        stats.total_users.to_string(),
        stats.active_users.to_string(),
        stats.total_tools.to_string(),
        stats.total_executions.to_string(),
    ]);
    table
}

pub fn status_table(status: &SystemStatus) -> Table {
    let mut table = table();
    table.set_header(vec!["Status", "Uptime (s)", "Memory used", "CPU", "Cores"]);
    table.add_row(vec![
        format!("{:?}", status.status).to_lowercase(),
        status.uptime.to_string(),
        format!("{} / {}", status.memory.used, status.memory.total),
        format!("{:.1}%", status.cpu.usage),
        status.cpu.cores.to_string(),
    ]);
    table
}

pub fn inbox_table(items: &[StoredNotification]) -> Table {
    let mut table = table();
    table.set_header(vec!["ID", "", "Message", "Received", "Read"]);
    for item in items {
        table.add_row(vec![
            item.id.clone(),
            item.severity.to_string(),
            item.message.clone(),
            item.created_at.clone().unwrap_or_default(),
            if item.read { "✓" } else { "" }.to_string(),
        ]);
    }
    table
}
