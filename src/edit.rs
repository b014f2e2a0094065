//! Ticket field commands.
//!
//! Updates, archiving and deletion are applied optimistically and confirmed
//! the same way moves are. Creation waits for the server, which assigns the
//! id. On failure the ticket is restored, the user notified, and the error
//! returned to the caller.

use crate::context::{BoardSyncContext, OptimisticChange};
use crate::error::{Result, SyncError};
use crate::remote::BoardApi;
use crate::types::{NewTicket, Ticket, TicketId, TicketPatch};

pub async fn update_ticket<A: BoardApi>(
    ctx: &BoardSyncContext,
    api: &A,
    ticket_id: &TicketId,
    patch: &TicketPatch,
) -> Result<Ticket> {
    patch_ticket(ctx, api, ticket_id, patch, "update ticket").await
}

/// Soft-delete: set `archivedAt` to now.
pub async fn archive_ticket<A: BoardApi>(
    ctx: &BoardSyncContext,
    api: &A,
    ticket_id: &TicketId,
) -> Result<Ticket> {
    let patch = TicketPatch {
        archived_at: Some(Some(ctx.now())),
        ..Default::default()
    };
    patch_ticket(ctx, api, ticket_id, &patch, "archive ticket").await
}

pub async fn unarchive_ticket<A: BoardApi>(
    ctx: &BoardSyncContext,
    api: &A,
    ticket_id: &TicketId,
) -> Result<Ticket> {
    let patch = TicketPatch {
        archived_at: Some(None),
        ..Default::default()
    };
    patch_ticket(ctx, api, ticket_id, &patch, "unarchive ticket").await
}

/// Hard-delete a ticket.
pub async fn delete_ticket<A: BoardApi>(
    ctx: &BoardSyncContext,
    api: &A,
    ticket_id: &TicketId,
) -> Result<()> {
    ctx.ensure_can_edit()?;
    if !ctx.store().contains(ticket_id.as_str()) {
        return Err(SyncError::TicketNotFound(ticket_id.to_string()));
    }

    let change = ctx.apply_optimistic(ticket_id, None);
    match api.delete_ticket(ticket_id).await {
        Ok(()) => {
            ctx.settle(&change, None);
            tracing::info!(ticket = %ticket_id, "ticket deleted");
            Ok(())
        }
        Err(e) => Err(fail(ctx, &change, "delete ticket", e)),
    }
}

/// Create a ticket. Nothing is shown until the server answers.
pub async fn create_ticket<A: BoardApi>(
    ctx: &BoardSyncContext,
    api: &A,
    ticket: &NewTicket,
) -> Result<Ticket> {
    ctx.ensure_can_edit()?;
    match api.create_ticket(ticket).await {
        Ok(created) => {
            ctx.apply_remote(created.clone());
            tracing::info!(ticket = %created.id, column = %created.column_id, "ticket created");
            Ok(created)
        }
        Err(e) => {
            ctx.notify_failure("create ticket", &e);
            Err(e)
        }
    }
}

async fn patch_ticket<A: BoardApi>(
    ctx: &BoardSyncContext,
    api: &A,
    ticket_id: &TicketId,
    patch: &TicketPatch,
    action: &str,
) -> Result<Ticket> {
    ctx.ensure_can_edit()?;
    let current = ctx
        .store()
        .get(ticket_id.as_str())
        .ok_or_else(|| SyncError::TicketNotFound(ticket_id.to_string()))?;
    if patch.is_empty() {
        return Ok(current);
    }

    let mut next = current;
    next.apply_patch(patch);
    let change = ctx.apply_optimistic(ticket_id, Some(next));

    match api.update_ticket(ticket_id, patch).await {
        Ok(confirmed) => {
            ctx.settle(&change, Some(confirmed.clone()));
            Ok(confirmed)
        }
        Err(e) => Err(fail(ctx, &change, action, e)),
    }
}

fn fail(ctx: &BoardSyncContext, change: &OptimisticChange, action: &str, error: SyncError) -> SyncError {
    ctx.rollback(change);
    ctx.notify_failure(action, &error);
    error
}
