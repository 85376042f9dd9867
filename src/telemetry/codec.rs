//! Wire format for the telemetry ingress frame.
//!
//! A report is a fixed 20-byte big-endian frame: the latency sample as an
//! f64, the throughput rate as an f32 and the owned-resource count as an
//! i64. Transport framing around it is the ingress layer's problem.

use crate::telemetry::TelemetryReport;
use bytes::{Buf, BufMut};

pub const REPORT_FRAME_LEN: usize = 8 + 4 + 8;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("telemetry frame truncated: got {0} bytes, need {REPORT_FRAME_LEN}")]
    Truncated(usize),
}

pub fn decode_report(buf: &mut impl Buf) -> Result<TelemetryReport, CodecError> {
    if buf.remaining() < REPORT_FRAME_LEN {
        return Err(CodecError::Truncated(buf.remaining()));
    }

    Ok(TelemetryReport {
        latency_ms: buf.get_f64(),
        throughput: buf.get_f32(),
        owned_resources: buf.get_i64(),
    })
}

pub fn encode_report(report: &TelemetryReport, buf: &mut impl BufMut) {
    buf.put_f64(report.latency_ms);
    buf.put_f32(report.throughput);
    buf.put_i64(report.owned_resources);
}
