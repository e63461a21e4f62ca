use super::columns::ColumnSet;
use crate::datamodel::{DIGEST_SUBJECT, NotificationRecord};

fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Converter for a batch to a minimal HTML table
pub struct HtmlConverter;

impl HtmlConverter {
    pub fn to_html(records: &[NotificationRecord], generated_at: &str) -> String {
        let columns = ColumnSet::from_records(records);
        let mut html = String::new();

        html.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
        html.push_str(&format!("<title>{}</title>\n", escape_html(DIGEST_SUBJECT)));
        html.push_str("</head>\n<body>\n<table>\n");
        html.push_str(&format!(
            "<caption>{} notifications, generated at {}</caption>\n",
            records.len(),
            escape_html(generated_at)
        ));

        html.push_str("<thead>\n<tr>");
        for header in columns.headers() {
            html.push_str(&format!("<th>{}</th>", escape_html(header)));
        }
        html.push_str("</tr>\n</thead>\n<tbody>\n");

        for record in records {
            html.push_str("<tr>");
            for cell in columns.row(record) {
                html.push_str(&format!("<td>{}</td>", escape_html(&cell)));
            }
            html.push_str("</tr>\n");
        }

        html.push_str("</tbody>\n</table>\n</body>\n</html>\n");
        html
    }
}
