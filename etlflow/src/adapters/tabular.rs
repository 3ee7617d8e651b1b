//! Minimal delimited-text reader and writer shared by the local adapters.

/// A parsed delimited file: header plus raw rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    /// Column names.
    pub header: Vec<String>,
    /// Rows as parsed, which may have a different field count than the header.
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Parses comma-separated text with optional double-quoted fields.
    ///
    /// Blank lines are ignored. An empty input yields an empty table.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut lines = text.lines().filter(|l| !l.trim().is_empty());
        let Some(first) = lines.next() else {
            return Self::default();
        };
        Self {
            header: split_record(first)
                .into_iter()
                .map(|h| h.trim().to_string())
                .collect(),
            rows: lines.map(split_record).collect(),
        }
    }

    /// Position of a column in the header.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h == name)
    }

    /// Renders the table back to text, quoting fields where needed.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = render_record(&self.header);
        out.push('\n');
        for row in &self.rows {
            out.push_str(&render_record(row));
            out.push('\n');
        }
        out
    }
}

fn split_record(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.trim_end_matches('\r').chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }
    fields.push(field);
    fields
}

fn render_record(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| {
            if f.contains([',', '"', '\n']) {
                format!("\"{}\"", f.replace('"', "\"\""))
            } else {
                f.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}
