use crate::error::{MonitorError, MonitorResult};

pub const WINDOW: usize = 3;

/// Shape of the last three scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trend {
    Declining,
    Improving,
    Stable,
    Mixed,
}

impl Trend {
    pub fn label(self) -> &'static str {
        match self {
            Trend::Declining => "menurun",
            Trend::Improving => "meningkat",
            Trend::Stable => "stabil",
            Trend::Mixed => "berfluktuasi",
        }
    }
}

/// The three most recent scores, or `InvalidInput` when fewer were supplied.
pub(crate) fn recent_window(scores: &[i32]) -> MonitorResult<&[i32]> {
    scores
        .len()
        .checked_sub(WINDOW)
        .map(|start| &scores[start..])
        .ok_or_else(|| {
            MonitorError::InvalidInput(format!(
                "at least {WINDOW} scores are required, got {}",
                scores.len()
            ))
        })
}

fn last_window(scores: &[i32]) -> MonitorResult<[i32; WINDOW]> {
    let window = recent_window(scores)?;
    Ok([window[0], window[1], window[2]])
}

/// Integer scores: a drop of at least one point is a strict decrease.
fn drops(previous: i32, next: i32) -> bool {
    next < previous
}

/// Returns true when each of the last two transitions drops by at least one point.
/// Earlier history and the score range are not inspected.
pub fn evaluate(scores: &[i32]) -> MonitorResult<bool> {
    let [s0, s1, s2] = last_window(scores)?;
    Ok(drops(s0, s1) && drops(s1, s2))
}

pub fn trend(scores: &[i32]) -> MonitorResult<Trend> {
    let [s0, s1, s2] = last_window(scores)?;
    let trend = if drops(s0, s1) && drops(s1, s2) {
        Trend::Declining
    } else if s0 == s1 && s1 == s2 {
        Trend::Stable
    } else if s1 >= s0 && s2 >= s1 {
        Trend::Improving
    } else {
        Trend::Mixed
    };
    Ok(trend)
}
