use chrono::{DateTime, Utc};

/// Render the state listing page from parallel name/population lists.
pub fn render_index(names: &[String], populations: &[u64], updated_at: DateTime<Utc>) -> String {
    let mut rows = String::new();
    for (name, population) in names.iter().zip(populations) {
        rows.push_str(&format!(
            "<tr><td>{}</td><td class=\"num\">{}</td></tr>\n",
            html_escape(name),
            group_thousands(*population)
        ));
    }

    let content = format!(
        r#"<h1>Population by State</h1>
<p class="meta">{} states &middot; updated {}</p>
<table>
<thead><tr><th>State</th><th>Population</th></tr></thead>
<tbody>
{}</tbody>
</table>"#,
        names.len(),
        updated_at.format("%Y-%m-%d %H:%M UTC"),
        rows
    );

    build_page("Population by State", &content)
}

/// Render the page shown before the first snapshot exists.
pub fn render_no_data() -> String {
    build_page(
        "Population by State",
        r#"<h1>Population by State</h1>
<p class="meta">No data yet. The first refresh has not completed.</p>"#,
    )
}

fn build_page(title: &str, content: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{}</title>
<style>
body {{ font-family: system-ui, sans-serif; max-width: 640px; margin: 40px auto; color: #222; }}
table {{ width: 100%; border-collapse: collapse; }}
th, td {{ padding: 6px 8px; border-bottom: 1px solid #eee; text-align: left; }}
td.num {{ text-align: right; font-variant-numeric: tabular-nums; }}
.meta {{ color: #777; font-size: 14px; }}
</style>
</head>
<body>
{}
</body>
</html>"#,
        html_escape(title),
        content
    )
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
