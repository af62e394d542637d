//! Line-oriented parser for `tc -s qdisc show`, feeding the per-iteration
//! `queue-stats.csv` artifact.

/// Extra counters emitted by CoDel qdiscs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoDelStats {
    pub maxpacket: u64,
    pub ecn_mark: u64,
    pub drop_overlimit: u64,
}

/// One parsed qdisc with its cumulative counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QdiscStats {
    pub device: String,
    pub handle: String,
    /// Qdisc type, e.g. `htb`, `codel`, `netem`.
    pub queue: String,
    /// `root`, `parent` or `ingress`.
    pub attach: String,
    pub parent_id: Option<String>,
    pub bytes_sent: u64,
    pub packets_sent: u64,
    pub packets_dropped: u64,
    pub overlimits: u64,
    pub requeues: u64,
    pub codel: Option<CoDelStats>,
}

#[derive(Debug, Default)]
struct PendingQdisc {
    device: String,
    handle: String,
    queue: String,
    attach: String,
    parent_id: Option<String>,
}

/// Parses the full output of `tc -s qdisc show`.
///
/// Recognized shape per qdisc:
///
/// ```text
/// qdisc codel 3: dev enp2s0 parent 20:3 limit 41p target 500us ...
///  Sent 123456 bytes 100 pkt (dropped 2, overlimits 0 requeues 0)
///   maxpacket 1514 ecn_mark 13 drop_overlimit 0
/// ```
///
/// Non-CoDel qdiscs are emitted after their stats line; CoDel qdiscs wait for
/// the extension line carrying the marking counters. Unrecognized lines are
/// skipped.
pub fn parse_qdisc_show(stdout: &str) -> Vec<QdiscStats> {
    let mut rows = Vec::new();
    let mut pending: Option<(PendingQdisc, Option<QdiscStats>)> = None;

    for line in stdout.lines() {
        if let Some(rest) = line.strip_prefix("qdisc ") {
            // Flush a CoDel row whose extension line never came.
            if let Some((_, Some(row))) = pending.take() {
                rows.push(row);
            }
            let fields: Vec<&str> = rest.split_whitespace().collect();
            // <type> <handle> dev <dev> <root|parent|ingress> [<parent-id>]
            if fields.len() < 5 || fields[2] != "dev" {
                continue;
            }
            let attach = fields[4].to_string();
            let parent_id =
                if attach == "parent" { fields.get(5).map(|s| s.to_string()) } else { None };
            pending = Some((
                PendingQdisc {
                    device: fields[3].to_string(),
                    handle: fields[1].to_string(),
                    queue: fields[0].to_string(),
                    attach,
                    parent_id,
                },
                None,
            ));
        } else if let Some(rest) = line.trim_start().strip_prefix("Sent ") {
            let Some((header, _)) = pending.as_ref() else { continue };
            let fields: Vec<&str> = rest.split_whitespace().collect();
            // <bytes> bytes <pkts> pkt (dropped <d>, overlimits <o> requeues <r>)
            if fields.len() < 10 {
                continue;
            }
            let row = QdiscStats {
                device: header.device.clone(),
                handle: header.handle.clone(),
                queue: header.queue.clone(),
                attach: header.attach.clone(),
                parent_id: header.parent_id.clone(),
                bytes_sent: parse_count(fields[0]),
                packets_sent: parse_count(fields[2]),
                packets_dropped: parse_count(fields[5]),
                overlimits: parse_count(fields[7]),
                requeues: parse_count(fields[9]),
                codel: None,
            };
            if header.queue == "codel" {
                pending = pending.map(|(h, _)| (h, Some(row)));
            } else {
                rows.push(row);
                pending = None;
            }
        } else if line.trim_start().starts_with("maxpacket") {
            if let Some((_, Some(mut row))) = pending.take() {
                row.codel = Some(parse_codel_extension(line));
                rows.push(row);
            }
        }
    }

    if let Some((_, Some(row))) = pending {
        rows.push(row);
    }

    rows
}

/// Reads the alternating key/value pairs of the CoDel extension line.
fn parse_codel_extension(line: &str) -> CoDelStats {
    let mut stats = CoDelStats::default();
    let mut fields = line.split_whitespace();
    while let (Some(key), Some(value)) = (fields.next(), fields.next()) {
        match key {
            "maxpacket" => stats.maxpacket = parse_count(value),
            "ecn_mark" => stats.ecn_mark = parse_count(value),
            "drop_overlimit" => stats.drop_overlimit = parse_count(value),
            _ => {}
        }
    }
    stats
}

fn parse_count(field: &str) -> u64 {
    field.trim_matches(|c: char| !c.is_ascii_digit()).parse().unwrap_or(0)
}

/// Renders the parsed rows as `queue-stats.csv` (leading index column).
pub fn stats_to_csv(rows: &[QdiscStats]) -> String {
    let mut csv = String::from(
        ",Device,Handle,Queue,Attach,Parent-ID,Bytes Sent,Packets Sent,Packets Dropped,\
         Overlimits,Requeues,CoDel MaxPacket,CoDel ECN_Mark,CoDel Drop_OverLimit\n",
    );
    for (index, row) in rows.iter().enumerate() {
        let codel = row.codel.as_ref();
        let opt = |v: Option<u64>| v.map(|v| v.to_string()).unwrap_or_default();
        csv.push_str(&format!(
            "{index},{},{},{},{},{},{},{},{},{},{},{},{},{}\n",
            row.device,
            row.handle,
            row.queue,
            row.attach,
            row.parent_id.as_deref().unwrap_or(""),
            row.bytes_sent,
            row.packets_sent,
            row.packets_dropped,
            row.overlimits,
            row.requeues,
            opt(codel.map(|c| c.maxpacket)),
            opt(codel.map(|c| c.ecn_mark)),
            opt(codel.map(|c| c.drop_overlimit)),
        ));
    }
    csv
}
