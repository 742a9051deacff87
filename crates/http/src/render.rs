//! HTML listing served at `/`.

use metricsd_app::MetricListing;
use std::fmt::Write;

/// Render every counter and gauge as an HTML page.
#[must_use]
pub fn render_listing(listing: &MetricListing) -> String {
    let mut html = String::from(
        "<!DOCTYPE html>\n<html>\n<head><title>Metrics</title></head>\n<body>\n",
    );
    html.push_str("<h1>Counters</h1>\n<ul>\n");
    for (name, total) in &listing.counters {
        let _ = writeln!(html, "<li>{}: {total}</li>", escape_html(name));
    }
    html.push_str("</ul>\n<h1>Gauges</h1>\n<ul>\n");
    for (name, value) in &listing.gauges {
        let _ = writeln!(html, "<li>{}: {value}</li>", escape_html(name));
    }
    html.push_str("</ul>\n</body>\n</html>\n");
    html
}

fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
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
