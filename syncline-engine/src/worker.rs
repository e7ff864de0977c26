//! The unit of work behind one queue line.
//!
//! Inbound lines land in the local record store, outbound lines are written
//! to the external system. Either way a success ends with exactly one
//! mapping create-or-update for the pair of identifiers.

use crate::connector::ExternalConnector;
use crate::error::{SyncError, SyncResult};
use syncline_store::{
    Database, LocalRecord, MappingOutcome, NewLine, NewMapping, SyncQueueLine,
};
use syncline_types::{
    CustomerInsights, CustomerSegment, Direction, EntityId, EntityRecord, EntityType, ExternalId,
    OrderRecord, OrgId,
};
use tracing::{debug, warn};

/// Order status counted as completed when deriving insights.
const COMPLETED_STATUS: &str = "completed";

/// Everything a line needs besides its own payload.
pub struct LineContext<'a> {
    pub org_id: OrgId,
    pub entity_type: EntityType,
    pub direction: Direction,
    pub connector: &'a dyn ExternalConnector,
    pub db: &'a Database,
}

/// Identifiers a successful line ended up with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineSuccess {
    pub internal_id: EntityId,
    pub external_id: ExternalId,
    /// `false` when the target record was created.
    pub was_update: bool,
}

/// Queue line for a record read from the external system.
pub fn inbound_line(record: EntityRecord) -> NewLine {
    NewLine {
        external_key: record.id().to_string(),
        internal_id: None,
        payload: record,
    }
}

/// Queue line for a record of the local store.
pub fn outbound_line(local: LocalRecord) -> NewLine {
    NewLine {
        external_key: local.id.to_string(),
        internal_id: Some(local.id),
        payload: local.record,
    }
}

/// Runs one attempt for a line.
pub async fn sync_line(ctx: &LineContext<'_>, line: &SyncQueueLine) -> SyncResult<LineSuccess> {
    match ctx.direction {
        Direction::Inbound => sync_inbound(ctx, line).await,
        Direction::Outbound => sync_outbound(ctx, line).await,
    }
}

// ── Inbound ──────────────────────────────────────────────────────

async fn sync_inbound(ctx: &LineContext<'_>, line: &SyncQueueLine) -> SyncResult<LineSuccess> {
    let external_id = ExternalId::new(line.external_key.clone());
    let mut record = line.payload.clone();

    if let EntityRecord::Customer(customer) = &mut record {
        match ctx.connector.list_customer_orders(&external_id).await {
            Ok(orders) => customer.insights = Some(derive_insights(&orders)),
            Err(e) => warn!("Skipping insights for customer {}: {}", external_id, e),
        }
    }

    let records = ctx.db.records();
    let mappings = ctx.db.mappings();
    let connector_id = ctx.connector.connector_id();

    let mut existing = match mappings.get_by_external(&connector_id, ctx.entity_type, &external_id)? {
        Some(mapping) => records.get(&mapping.internal_id)?,
        None => None,
    };
    if existing.is_none() {
        existing = records.find_by_natural_key(&ctx.org_id, ctx.entity_type, &record.natural_key())?;
    }

    let (stored, was_update) = match existing {
        Some(local) => (records.update(&local.id, &record)?, true),
        None => (records.insert(&ctx.org_id, &record)?, false),
    };

    record_mapping(ctx, new_mapping(ctx, stored.id, external_id.clone(), &line.payload)?)?;
    debug!(
        "Inbound {} {} -> {} ({})",
        ctx.entity_type,
        external_id,
        stored.id,
        if was_update { "updated" } else { "created" }
    );
    Ok(LineSuccess {
        internal_id: stored.id,
        external_id,
        was_update,
    })
}

/// Order-derived figures for a customer.
pub fn derive_insights(orders: &[OrderRecord]) -> CustomerInsights {
    let completed_orders = orders
        .iter()
        .filter(|o| o.status.eq_ignore_ascii_case(COMPLETED_STATUS))
        .count() as u32;
    let lifetime_value: f64 = orders.iter().map(|o| o.total).sum();
    let dates = orders.iter().filter_map(|o| o.date_created);

    CustomerInsights {
        order_count: orders.len() as u32,
        completed_orders,
        lifetime_value,
        segment: CustomerSegment::classify(lifetime_value, completed_orders),
        acquisition_date: dates.clone().min(),
        last_interaction_date: dates.max(),
    }
}

// ── Outbound ─────────────────────────────────────────────────────

async fn sync_outbound(ctx: &LineContext<'_>, line: &SyncQueueLine) -> SyncResult<LineSuccess> {
    let internal_id = line
        .internal_id
        .ok_or_else(|| SyncError::Validation(format!("line {} has no local record id", line.id)))?;
    let record = &line.payload;
    let mappings = ctx.db.mappings();
    let connector_id = ctx.connector.connector_id();

    if let Some(mapping) = mappings.get_by_internal(&connector_id, ctx.entity_type, &internal_id)? {
        ctx.connector.update(&mapping.external_id, record).await?;
        record_mapping(ctx, new_mapping(ctx, internal_id, mapping.external_id.clone(), record)?)?;
        return Ok(LineSuccess {
            internal_id,
            external_id: mapping.external_id,
            was_update: true,
        });
    }

    // Unmapped but already present remotely: adopt the remote record.
    if let Some(remote) = ctx
        .connector
        .find_by_natural_key(ctx.entity_type, &record.natural_key())
        .await?
    {
        let external_id = ExternalId::new(remote.id());
        ctx.connector.update(&external_id, record).await?;
        record_mapping(ctx, new_mapping(ctx, internal_id, external_id.clone(), record)?)?;
        debug!("Adopted external {} {} for {}", ctx.entity_type, external_id, internal_id);
        return Ok(LineSuccess {
            internal_id,
            external_id,
            was_update: true,
        });
    }

    let created_id = ctx.connector.create(record).await?;
    let mapping = new_mapping(ctx, internal_id, created_id.clone(), record)?;
    match mappings.create(&mapping)? {
        MappingOutcome::Existing(existing) => {
            // A concurrent writer mapped this record first; write through
            // the established pair instead of keeping a second one.
            warn!(
                "{} {} already mapped to {}, created {} is orphaned",
                ctx.entity_type, internal_id, existing.external_id, created_id
            );
            ctx.connector.update(&existing.external_id, record).await?;
            record_mapping(
                ctx,
                NewMapping {
                    external_id: existing.external_id.clone(),
                    ..mapping
                },
            )?;
            Ok(LineSuccess {
                internal_id,
                external_id: existing.external_id,
                was_update: true,
            })
        }
        _ => Ok(LineSuccess {
            internal_id,
            external_id: created_id,
            was_update: false,
        }),
    }
}

/// Upserts the mapping of a synced pair. Mappings the pair displaces are
/// deactivated by the store and logged here.
fn record_mapping(ctx: &LineContext<'_>, mapping: NewMapping) -> SyncResult<()> {
    if let MappingOutcome::Replaced { record, replaced } = ctx.db.mappings().upsert(&mapping)? {
        for stale in &replaced {
            warn!(
                "Remapped {} {}: replaced pairing {} <-> external {}",
                ctx.entity_type, record.internal_id, stale.internal_id, stale.external_id
            );
        }
        debug!(
            "{} {} now maps to external {}",
            ctx.entity_type, record.internal_id, record.external_id
        );
    }
    Ok(())
}

fn new_mapping(
    ctx: &LineContext<'_>,
    internal_id: EntityId,
    external_id: ExternalId,
    record: &EntityRecord,
) -> SyncResult<NewMapping> {
    Ok(NewMapping {
        org_id: ctx.org_id,
        connector_id: ctx.connector.connector_id(),
        entity_type: ctx.entity_type,
        internal_id,
        external_id,
        external_model: ctx.connector.external_model(ctx.entity_type).to_string(),
        direction: ctx.direction,
        sync_data: Some(serde_json::to_value(record)?),
    })
}
