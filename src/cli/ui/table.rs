use std::fmt::{self, Display, Formatter};

use tabled::{builder::Builder, settings::Style as TableStyle};

use super::painter::Painter;

/// A rounded table rendered through `Display`.
#[derive(Debug)]
pub(crate) struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub(crate) fn grid(
        headers: impl IntoIterator<Item = impl Into<String>>,
        rows: Vec<Vec<String>>,
    ) -> Self {
        Self {
            headers: headers.into_iter().map(Into::into).collect(),
            rows,
        }
    }

    /// Two columns of muted field names and their values.
    pub(crate) fn key_value(painter: &Painter, rows: Vec<(&str, String)>) -> Self {
        let records = rows
            .into_iter()
            .map(|(field, value)| vec![painter.muted(field), value])
            .collect();
        Self::grid(["field", "value"], records)
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut builder = Builder::default();
        builder.push_record(&self.headers);
        for row in &self.rows {
            builder.push_record(row);
        }
        let mut table = builder.build();
        table.with(TableStyle::rounded());
        write!(f, "{table}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_renders_headers_before_rows() {
        let rendered = Table::grid(
            ["device_id", "rssi"],
            vec![
                vec!["AA:BB".into(), "-40".into()],
                vec!["CC:DD".into(), "-71".into()],
            ],
        )
        .to_string();

        let header = rendered.find("device_id").expect("header should render");
        let first = rendered.find("AA:BB").expect("first row should render");
        let second = rendered.find("CC:DD").expect("second row should render");
        assert!(header < first && first < second);
        assert!(rendered.starts_with('╭'));
    }

    #[test]
    fn key_value_lists_each_field() {
        let painter = Painter::new(false);
        let rendered = Table::key_value(
            &painter,
            vec![("device_id", "AA:BB".into()), ("rssi", "-40".into())],
        )
        .to_string();

        assert!(rendered.contains("field"));
        assert!(rendered.contains("device_id"));
        assert!(rendered.contains("-40"));
    }
}
