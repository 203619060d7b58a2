//! SPDX-License-Identifier: GPL-3.0-or-later

//! Stage 3: compresses a dense [`Classification`] stream into a sparse
//! [`Event`] stream. A pure function; cannot fail.

use crate::types::{ActivityLabel, Classification, Event, EventKind};

/// Looks up the Event kind(s) triggered by `prev -> next`. `swing_to_dig
/// -> digging` matches both the `return_to_dig` row and the general
/// `any -> digging` `dig_start` row (spec transition table, §3): it
/// closes the finishing cycle and reopens the next one in the same
/// frame, so both events are emitted, return first so the CycleAssembler
/// sees `IN_SWING_BACK -> IDLE -> IN_DIG` in order.
fn transitions(prev: ActivityLabel, next: ActivityLabel) -> Vec<EventKind> {
    use ActivityLabel::*;
    use EventKind::*;

    let mut out = Vec::with_capacity(2);
    if prev == next {
        return out;
    }
    match (prev, next) {
        (SwingToDig, Digging) => {
            out.push(ReturnToDig);
            out.push(DigStart);
        }
        (SwingToDig, Idle) => out.push(ReturnToDig),
        (_, Digging) => out.push(DigStart),
        (_, Dumping) => out.push(DumpStart),
        (Digging, SwingToDump) => out.push(DigEnd),
        (Digging, Idle) => out.push(DigEnd),
        (Dumping, SwingToDig) => out.push(DumpEnd),
        (Dumping, Idle) => out.push(DumpEnd),
        _ => {}
    }
    out
}

/// Detects events over one run's classification sequence. `prev_label`
/// starts at `Idle` so a video opening mid-dig still emits a `dig_start`
/// at frame 0.
pub fn detect_events(classifications: &[Classification]) -> Vec<Event> {
    let mut events = Vec::new();
    let mut prev_label = ActivityLabel::Idle;

    for c in classifications {
        for kind in transitions(prev_label, c.label) {
            events.push(Event {
                kind,
                timestamp: c.timestamp,
                frame_index: c.frame_index,
                prev_label,
                new_label: c.label,
            });
        }
        prev_label = c.label;
    }

    events
}
