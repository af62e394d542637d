//! Schema of the telemetry CSV the classification agent streams: one row per
//! observed classification event.

/// Column order of the agent's CSV output.
pub const COLUMNS: [&str; 16] = [
    "IP-Source",
    "IP-Destination",
    "Port-Source",
    "Port-Destination",
    "Timestamp",
    "RTT",
    "Class-ID",
    "Bytes",
    "ECN",
    "Drops",
    "NewClass",
    "RespCnt_ECN",
    "UnrespCnt_ECN",
    "RespCnt_drop",
    "UnrespCnt_drop",
    "Protocol",
];

/// The CSV header line.
pub fn header() -> String {
    COLUMNS.join(",")
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("expected {expected} columns, got {got}")]
    ColumnCount { expected: usize, got: usize },
    #[error("column {column} is not numeric: `{value}`")]
    NotNumeric { column: &'static str, value: String },
}

/// One parsed telemetry row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryRecord {
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    /// Agent-side monotonic timestamp in nanoseconds.
    pub timestamp: u64,
    /// Spin/ACK derived RTT estimate in nanoseconds.
    pub rtt: u64,
    pub class_id: u32,
    pub bytes: u64,
    pub ecn_marks: u32,
    pub drops: u32,
    pub new_class: bool,
    pub resp_cnt_ecn: u32,
    pub unresp_cnt_ecn: u32,
    pub resp_cnt_drop: u32,
    pub unresp_cnt_drop: u32,
    pub protocol: String,
}

impl TelemetryRecord {
    /// Parses one data row (not the header).
    pub fn parse_line(line: &str) -> Result<Self, ParseError> {
        let fields: Vec<&str> = line.trim_end().split(',').collect();
        if fields.len() != COLUMNS.len() {
            return Err(ParseError::ColumnCount { expected: COLUMNS.len(), got: fields.len() });
        }

        fn num<T: std::str::FromStr>(
            fields: &[&str],
            index: usize,
        ) -> Result<T, ParseError> {
            fields[index].trim().parse().map_err(|_| ParseError::NotNumeric {
                column: COLUMNS[index],
                value: fields[index].to_string(),
            })
        }

        Ok(Self {
            src_ip: fields[0].trim().to_string(),
            dst_ip: fields[1].trim().to_string(),
            src_port: num(&fields, 2)?,
            dst_port: num(&fields, 3)?,
            timestamp: num(&fields, 4)?,
            rtt: num(&fields, 5)?,
            class_id: num(&fields, 6)?,
            bytes: num(&fields, 7)?,
            ecn_marks: num(&fields, 8)?,
            drops: num(&fields, 9)?,
            new_class: num::<u32>(&fields, 10)? != 0,
            resp_cnt_ecn: num(&fields, 11)?,
            unresp_cnt_ecn: num(&fields, 12)?,
            resp_cnt_drop: num(&fields, 13)?,
            unresp_cnt_drop: num(&fields, 14)?,
            protocol: fields[15].trim().to_string(),
        })
    }
}
