//! Read-only HTML board listing mirrored tickets for operators.
use super::*;

const DIALOG_PREVIEW_CHARS: usize = 96;

pub(super) fn render_operator_page(tickets: &[Ticket]) -> String {
    let mut state_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for ticket in tickets {
        let state = ticket
            .state
            .as_deref()
            .filter(|state| !state.is_empty())
            .unwrap_or("(none)");
        *state_counts.entry(state).or_insert(0) += 1;
    }
    let summary = state_counts
        .iter()
        .map(|(state, count)| {
            format!(
                r#"<span class="chip">{}: {}</span>"#,
                escape_html(state),
                count
            )
        })
        .collect::<Vec<_>>()
        .join("\n    ");

    let rows = if tickets.is_empty() {
        r#"<tr><td colspan="6" class="empty">No mirrored tickets yet.</td></tr>"#.to_string()
    } else {
        tickets
            .iter()
            .map(ticket_row)
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>Redes Ticket Mirror</title>
  <style>
    :root {{
      color-scheme: light;
      font-family: "IBM Plex Sans", "Segoe UI", sans-serif;
    }}
    body {{
      margin: 0;
      background: linear-gradient(160deg, #f4f6f8 0%, #eef2f7 100%);
      color: #13232f;
    }}
    .container {{
      max-width: 1100px;
      margin: 0 auto;
      padding: 1.5rem;
    }}
    h1 {{
      margin: 0 0 0.5rem 0;
      font-size: 1.5rem;
    }}
    p {{
      margin: 0.25rem 0 1rem 0;
      color: #3a4f5f;
    }}
    .panel {{
      background: #ffffff;
      border: 1px solid #d2dde6;
      border-radius: 12px;
      padding: 1rem;
      box-shadow: 0 8px 20px rgba(12, 25, 38, 0.06);
    }}
    .chip {{
      display: inline-block;
      background: #eef4fa;
      border: 1px solid #c5d5e4;
      border-radius: 999px;
      padding: 0.15rem 0.6rem;
      margin-right: 0.35rem;
      font-size: 0.8rem;
      color: #2c4356;
    }}
    table {{
      width: 100%;
      border-collapse: collapse;
      font-size: 0.9rem;
    }}
    th, td {{
      text-align: left;
      padding: 0.45rem 0.6rem;
      border-bottom: 1px solid #e3ebf2;
      vertical-align: top;
    }}
    th {{
      color: #375062;
      font-size: 0.8rem;
      text-transform: uppercase;
      letter-spacing: 0.04em;
    }}
    td.mono {{
      font-family: "IBM Plex Mono", "SFMono-Regular", monospace;
      font-size: 0.85rem;
      white-space: nowrap;
    }}
    td.empty {{
      color: #5b7183;
      text-align: center;
      padding: 1.5rem 0;
    }}
  </style>
</head>
<body>
  <div class="container">
    <h1>Redes Ticket Mirror</h1>
    <p>Tickets mirrored from Adamo, newest activity first. Webhook ingress at <code>{webhook_endpoint}</code>.</p>
    <div class="panel">
    {summary}
      <table>
        <thead>
          <tr>
            <th>Primary key</th>
            <th>Mirror key</th>
            <th>Kind</th>
            <th>State</th>
            <th>Dialog</th>
            <th>Updated</th>
          </tr>
        </thead>
        <tbody>
{rows}
        </tbody>
      </table>
    </div>
  </div>
</body>
</html>
"#,
        webhook_endpoint = WEBHOOK_ENDPOINT,
        summary = summary,
        rows = rows,
    )
}

fn ticket_row(ticket: &Ticket) -> String {
    format!(
        r#"          <tr>
            <td class="mono">{}</td>
            <td class="mono">{}</td>
            <td>{}</td>
            <td>{}</td>
            <td>{}</td>
            <td class="mono">{}</td>
          </tr>"#,
        escape_html(&ticket.primary_key),
        escape_html(&ticket.mirror_key),
        ticket.kind.as_str(),
        escape_html(ticket.state.as_deref().unwrap_or("(none)")),
        escape_html(&truncate_dialog(ticket.dialog.as_deref().unwrap_or(""))),
        ticket.updated_at.to_rfc3339(),
    )
}

fn truncate_dialog(dialog: &str) -> String {
    if dialog.chars().count() <= DIALOG_PREVIEW_CHARS {
        return dialog.to_string();
    }
    let preview: String = dialog.chars().take(DIALOG_PREVIEW_CHARS).collect();
    format!("{preview}…")
}

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}
