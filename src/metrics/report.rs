use crate::config::OutputFormat;
use serde::Serialize;
use std::io;

/// Packet rate of one action over one sampling period
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionRate {
    pub action: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<&'static str>,
    pub packets: u64,
    /// Seconds
    pub period: f64,
    pub pps: f64,
}

#[derive(Serialize)]
struct Report<'a> {
    rates: &'a [ActionRate],
}

/// `XDP_PASS     150 pkts (        50 pps) period(1.000000)`
pub fn format_text(rate: &ActionRate) -> String {
    let name = match rate.label {
        Some(label) => label.to_string(),
        None => rate.action.to_string(),
    };
    format!(
        "{:<12} {} pkts ({:>10.0} pps) period({:.6})",
        name, rate.packets, rate.pps, rate.period
    )
}

pub struct ReportWriter<W> {
    out: W,
    format: OutputFormat,
}

impl<W: io::Write> ReportWriter<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self { out, format }
    }

    pub fn write_report(&mut self, rates: &[ActionRate]) -> io::Result<()> {
        match self.format {
            OutputFormat::Text => {
                for rate in rates {
                    writeln!(self.out, "{}", format_text(rate))?;
                }
            }
            OutputFormat::Json => {
                serde_json::to_writer(&mut self.out, &Report { rates })?;
                writeln!(self.out)?;
            }
        }
        self.out.flush()
    }
}

impl ReportWriter<io::Stdout> {
    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(io::stdout(), format)
    }
}
