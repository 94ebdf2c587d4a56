/// A parsed status report, like `<Idle|WPos:1.000,2.000,0.000|FS:0,0>`.
///
/// Only the machine state and the work position are extracted; every other
/// field is ignored.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Status {
    /// The line as it was received, trimmed.
    pub raw: String,
    pub state: Option<String>,
    /// Work position (x, y, z) in millimeters. A report with only x and y
    /// has z = 0.
    pub position: Option<[f64; 3]>,
}

fn parse_state(line: &str) -> Option<String> {
    let rest = line.strip_prefix('<')?.trim_start();
    let end = rest
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    match rest[end..].chars().next() {
        Some('|' | ',' | '>') => Some(rest[..end].to_owned()),
        _ => None,
    }
}

fn parse_field(line: &str, name: &str) -> Option<[f64; 3]> {
    let start = line.find(name)? + name.len();
    let rest = &line[start..];
    let value = &rest[..rest.find(['|', '>']).unwrap_or(rest.len())];

    // Two-axis machines report just x and y.
    let mut ret = [0.0; 3];
    let mut parts = value.split(',');
    for (i, x) in ret.iter_mut().enumerate() {
        match parts.next() {
            Some(part) => *x = part.trim().parse().ok()?,
            None if i == 2 => break,
            None => return None,
        }
    }
    Some(ret)
}

impl Status {
    pub fn parse(line: &str) -> Status {
        let line = line.trim();
        let position = parse_field(line, "WPos:").or_else(|| {
            let mpos = parse_field(line, "MPos:")?;
            Some(match parse_field(line, "WCO:") {
                Some(wco) => [mpos[0] - wco[0], mpos[1] - wco[1], mpos[2] - wco[2]],
                None => mpos,
            })
        });

        Status {
            raw: line.to_owned(),
            state: parse_state(line),
            position,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("idle"))
    }
}
