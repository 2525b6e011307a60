//! HTML for POD pages and the top-level index.

use std::fmt::Write;
use std::path::Path;

use mdtf_settings::{CaseConfig, PodManifest};

use crate::record::{RunRecord, RunStatus};

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Substitute `{{CASENAME}}`, `{{FIRSTYR}}` and `{{LASTYR}}`.
pub fn render_template(template: &str, case: &CaseConfig) -> String {
    template
        .replace("{{CASENAME}}", &case.name)
        .replace("{{FIRSTYR}}", &case.first_year.to_string())
        .replace("{{LASTYR}}", &case.last_year.to_string())
}

fn title(manifest: Option<&PodManifest>, pod: &str) -> String {
    manifest
        .map(|m| m.settings.long_name.as_str())
        .filter(|name| !name.is_empty())
        .unwrap_or(pod)
        .to_string()
}

fn open(out: &mut String, heading: &str) {
    let _ = write!(
        out,
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{0}</title>\n</head>\n<body>\n<h1>{0}</h1>\n",
        escape(heading)
    );
}

fn close(out: &mut String) {
    out.push_str("</body>\n</html>\n");
}

/// Page for a POD that ran successfully but ships no template.
pub fn figures_page(record: &RunRecord, manifest: Option<&PodManifest>, case: &CaseConfig) -> String {
    let mut out = String::new();
    open(&mut out, &title(manifest, &record.pod));
    let _ = writeln!(
        out,
        "<p>Case {} ({}-{})</p>",
        escape(&case.name),
        case.first_year,
        case.last_year
    );
    if record.figures.is_empty() {
        out.push_str("<p>No figures were produced.</p>\n");
    } else {
        out.push_str("<ul>\n");
        for figure in &record.figures {
            let href = escape(&figure.to_string_lossy());
            let _ = writeln!(out, "<li><a href=\"{href}\">{href}</a></li>");
        }
        out.push_str("</ul>\n");
    }
    log_link(&mut out, record);
    close(&mut out);
    out
}

/// Page for a POD that was skipped, failed or cancelled.
pub fn error_page(record: &RunRecord, manifest: Option<&PodManifest>, case: &CaseConfig) -> String {
    let mut out = String::new();
    open(&mut out, &title(manifest, &record.pod));
    let _ = writeln!(
        out,
        "<p>Case {}: <strong>{}</strong></p>",
        escape(&case.name),
        record.status
    );
    if let Some(code) = record.exit_code {
        let _ = writeln!(out, "<p>Exit code {code}</p>");
    }
    if let Some(reason) = &record.reason {
        let _ = writeln!(
            out,
            "<p><code>{}</code> {}: {}</p>",
            reason.code,
            reason.kind.name(),
            escape(&reason.message)
        );
    }
    if !record.variables.is_empty() {
        out.push_str("<table>\n<tr><th>variable</th><th>status</th><th>tried</th></tr>\n");
        for v in &record.variables {
            let _ = writeln!(
                out,
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape(&v.name),
                v.status,
                escape(&v.chain.join(" > "))
            );
        }
        out.push_str("</table>\n");
    }
    log_link(&mut out, record);
    close(&mut out);
    out
}

fn log_link(out: &mut String, record: &RunRecord) {
    if let Some(name) = record
        .log_path
        .as_deref()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy())
    {
        let _ = writeln!(out, "<p><a href=\"{0}\">{0}</a></p>", escape(&name));
    }
}

/// One entry on the index page.
pub struct IndexEntry<'a> {
    pub record: &'a RunRecord,
    pub long_name: String,
}

/// The top-level index: one section per case, entries in the given order.
pub fn index_page(run_id: &str, sections: &[(&CaseConfig, Vec<IndexEntry<'_>>)]) -> String {
    let mut out = String::new();
    open(&mut out, &format!("MDTF diagnostics: {run_id}"));
    for (case, entries) in sections {
        let _ = writeln!(
            out,
            "<h2 id=\"{0}\">{0} ({1}-{2})</h2>",
            escape(&case.name),
            case.first_year,
            case.last_year
        );
        out.push_str("<table>\n<tr><th>POD</th><th>status</th><th>notes</th></tr>\n");
        for entry in entries {
            let record = entry.record;
            let href = format!("{0}/{1}/{1}.html", case.name, record.pod);
            let notes = match (&record.reason, record.status) {
                (Some(reason), _) => format!("{} {}", reason.code, escape(&reason.message)),
                (None, RunStatus::Succeeded) => format!("{} figure(s)", record.figures.len()),
                (None, _) => String::new(),
            };
            let _ = writeln!(
                out,
                "<tr><td><a href=\"{}\">{}</a></td><td>{}</td><td>{}</td></tr>",
                escape(&href),
                escape(&entry.long_name),
                record.status,
                notes
            );
        }
        out.push_str("</table>\n");
    }
    close(&mut out);
    out
}
