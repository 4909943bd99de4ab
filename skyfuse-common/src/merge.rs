//! Priority merge resolver
//!
//! Field-wise conflict resolution between the current snapshot of an
//! aircraft and an incoming report.
//!
//! **Precedence:** the incoming report wins when its source priority is
//! numerically lower (stronger), or when priorities are equal and it was
//! ingested strictly later. A stronger source's older report therefore still
//! beats a weaker source's newer one.
//!
//! **Overlay:** a winning report only replaces fields it actually populates.
//! A stronger-but-incomplete source never blanks out a field a weaker source
//! filled in.
//!
//! **Provenance:** `data_source`, `source_priority` and
//! `ingestion_timestamp` follow the incoming report only when it wins the
//! record-level precedence test, so they always describe the most recent
//! *winning* write.

use crate::snapshot::{AircraftSnapshot, SourceMeta};

/// Record-level precedence test
pub fn incoming_wins(existing: &SourceMeta, incoming: &SourceMeta) -> bool {
    incoming.priority < existing.priority
        || (incoming.priority == existing.priority && incoming.ingested_at > existing.ingested_at)
}

/// Copy each listed field from `$src` into `$dst` when `$src` has a value
macro_rules! overlay {
    ($dst:ident, $src:ident, $($field:ident),+ $(,)?) => {
        $(
            if $src.$field.is_some() {
                $dst.$field = $src.$field.clone();
            }
        )+
    };
}

/// Copy every populated mutable field of `src` into `dst`; identity and
/// provenance are left alone
pub fn overlay_populated(dst: &mut AircraftSnapshot, src: &AircraftSnapshot) {
    overlay!(
        dst,
        src,
        callsign,
        origin_country,
        time_position,
        last_contact,
        longitude,
        latitude,
        baro_altitude,
        on_ground,
        velocity,
        true_track,
        vertical_rate,
        geo_altitude,
        squawk,
        spi,
        position_source,
        category,
        aircraft_type,
        description,
        registration,
        emergency_status,
    );
}

/// Merge `incoming` (stamped with `meta`) over `existing`.
///
/// With no existing snapshot the result is `incoming` verbatim, provenance
/// taken from `meta`.
pub fn merge(
    existing: Option<&AircraftSnapshot>,
    incoming: AircraftSnapshot,
    meta: &SourceMeta,
) -> AircraftSnapshot {
    let mut incoming = incoming;
    incoming.data_source = meta.source.clone();
    incoming.source_priority = meta.priority;
    incoming.ingestion_timestamp = meta.ingested_at;

    let existing = match existing {
        None => return incoming,
        Some(existing) => existing,
    };

    if !incoming_wins(&existing.meta(), meta) {
        return existing.clone();
    }

    let mut merged = existing.clone();
    overlay_populated(&mut merged, &incoming);
    merged.data_source = incoming.data_source;
    merged.source_priority = incoming.source_priority;
    merged.ingestion_timestamp = incoming.ingestion_timestamp;
    merged
}

/// Merge using the incoming snapshot's own provenance
pub fn merge_snapshot(
    existing: Option<&AircraftSnapshot>,
    incoming: AircraftSnapshot,
) -> AircraftSnapshot {
    let meta = incoming.meta();
    merge(existing, incoming, &meta)
}
