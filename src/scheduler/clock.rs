//! Priority Clock - Time to deadline conversion.
//!
//! Time is measured in 10ms units offset by two, so that `1` stays free for
//! [`Deadline::SYNC`]. Asynchronous deadlines are rounded up into buckets so
//! updates issued close together share a deadline and batch into one pass.

use crate::types::{Deadline, Mode};

use super::context::ExecutionContext;

// =============================================================================
// Constants
// =============================================================================

/// Milliseconds per deadline unit.
pub const UNIT_SIZE: u64 = 10;
const MAGIC_NUMBER_OFFSET: u64 = 2;

pub const LOW_PRIORITY_EXPIRATION: u64 = 5000;
pub const LOW_PRIORITY_BATCH_SIZE: u64 = 250;

/// Interactive updates expire sooner; development builds allow extra slack.
#[cfg(debug_assertions)]
pub const HIGH_PRIORITY_EXPIRATION: u64 = 500;
#[cfg(not(debug_assertions))]
pub const HIGH_PRIORITY_EXPIRATION: u64 = 150;
pub const HIGH_PRIORITY_BATCH_SIZE: u64 = 100;

// =============================================================================
// Conversion
// =============================================================================

fn clamp_units(units: u64) -> Deadline {
    let units = units.clamp(u64::from(Deadline::SYNC.raw()) + 1, u64::from(Deadline::NEVER.raw()));
    Deadline::from_units(units as u32)
}

/// Convert milliseconds into a deadline value.
pub fn ms_to_deadline(ms: u64) -> Deadline {
    clamp_units(ms / UNIT_SIZE + MAGIC_NUMBER_OFFSET)
}

/// Convert a deadline back into milliseconds.
pub fn deadline_to_ms(deadline: Deadline) -> u64 {
    (u64::from(deadline.raw()).saturating_sub(MAGIC_NUMBER_OFFSET)) * UNIT_SIZE
}

fn ceiling(num: u64, precision: u64) -> u64 {
    (num / precision + 1) * precision
}

fn compute_expiration_bucket(current_time: Deadline, expiration_ms: u64, bucket_size_ms: u64) -> Deadline {
    let current = u64::from(current_time.raw()).saturating_sub(MAGIC_NUMBER_OFFSET);
    clamp_units(
        MAGIC_NUMBER_OFFSET
            + ceiling(
                current + expiration_ms / UNIT_SIZE,
                bucket_size_ms / UNIT_SIZE,
            ),
    )
}

/// Deadline of a low priority (async) update issued at `current_time`.
pub fn compute_async_expiration(current_time: Deadline) -> Deadline {
    compute_expiration_bucket(current_time, LOW_PRIORITY_EXPIRATION, LOW_PRIORITY_BATCH_SIZE)
}

/// Deadline of an interactive update issued at `current_time`.
pub fn compute_interactive_expiration(current_time: Deadline) -> Deadline {
    compute_expiration_bucket(current_time, HIGH_PRIORITY_EXPIRATION, HIGH_PRIORITY_BATCH_SIZE)
}

/// Pick the deadline for an update on a node with `mode`.
///
/// # Arguments
///
/// * `current_time` - Logical time of the update
/// * `mode` - Mode flags of the target node
/// * `ctx` - Execution context at the time of the update
/// * `in_progress` - Deadline of the pass currently rendering, if any
pub fn compute_expiration_for_mode(
    current_time: Deadline,
    mode: Mode,
    ctx: &ExecutionContext,
    in_progress: Option<Deadline>,
) -> Deadline {
    if let Some(forced) = ctx.expiration_context {
        return forced;
    }
    if ctx.is_working {
        if ctx.is_committing {
            return Deadline::SYNC;
        }
        if let Some(render) = ctx.render_deadline {
            return render;
        }
    }
    if !mode.contains(Mode::CONCURRENT) {
        return Deadline::SYNC;
    }

    let deadline = if ctx.is_batching_interactive_updates {
        compute_interactive_expiration(current_time)
    } else {
        compute_async_expiration(current_time)
    };
    // Don't fold a new update into the pass it may have interrupted
    match in_progress {
        Some(rendering) if rendering == deadline => deadline.bumped(),
        _ => deadline,
    }
}
