use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use storekeep_core::{
    Aggregate, AggregateRoot, DomainError, Metadata, UserId, aggregate_id,
};
use storekeep_events::Event;

use crate::stock::StockKey;

aggregate_id!(
    /// Inventory movement identifier.
    MovementId
);

/// Kind of stock change a movement records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementType {
    Inbound,
    Outbound,
    Adjustment,
    Transfer,
    Return,
}

/// How a movement's quantity changes `available_quantity`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockEffect {
    /// `available += quantity`
    Increase,
    /// `available -= quantity`, rejected below zero
    Decrease,
    /// `available = quantity`
    Set,
}

impl MovementType {
    pub const ALL: [MovementType; 5] = [
        MovementType::Inbound,
        MovementType::Outbound,
        MovementType::Adjustment,
        MovementType::Transfer,
        MovementType::Return,
    ];

    pub const fn effect(self) -> StockEffect {
        match self {
            MovementType::Inbound => StockEffect::Increase,
            MovementType::Return => StockEffect::Increase,
            MovementType::Outbound => StockEffect::Decrease,
            MovementType::Transfer => StockEffect::Decrease,
            MovementType::Adjustment => StockEffect::Set,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            MovementType::Inbound => "inbound",
            MovementType::Outbound => "outbound",
            MovementType::Adjustment => "adjustment",
            MovementType::Transfer => "transfer",
            MovementType::Return => "return",
        }
    }
}

impl core::str::FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown movement type '{s}'")))
    }
}

/// Movement lifecycle: Pending → Approved → Completed, or → Cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementStatus {
    Pending,
    Approved,
    Completed,
    Cancelled,
}

impl MovementStatus {
    pub const ALL: [MovementStatus; 4] = [
        MovementStatus::Pending,
        MovementStatus::Approved,
        MovementStatus::Completed,
        MovementStatus::Cancelled,
    ];

    pub const fn is_terminal(self) -> bool {
        matches!(self, MovementStatus::Completed | MovementStatus::Cancelled)
    }

    pub const fn can_transition_to(self, next: MovementStatus) -> bool {
        matches!(
            (self, next),
            (MovementStatus::Pending, MovementStatus::Approved)
                | (MovementStatus::Approved, MovementStatus::Completed)
                | (MovementStatus::Pending, MovementStatus::Cancelled)
                | (MovementStatus::Approved, MovementStatus::Cancelled)
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            MovementStatus::Pending => "pending",
            MovementStatus::Approved => "approved",
            MovementStatus::Completed => "completed",
            MovementStatus::Cancelled => "cancelled",
        }
    }
}

impl core::str::FromStr for MovementStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MovementStatus::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DomainError::validation(format!("unknown movement status '{s}'")))
    }
}

/// Aggregate root: InventoryMovement.
///
/// Quantity is fixed at creation. Only Pending movements may be edited or
/// deleted; Completed and Cancelled are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryMovement {
    id: MovementId,
    key: StockKey,
    movement_type: MovementType,
    status: MovementStatus,
    quantity: i64,
    unit_cost: i64,
    total_cost: i64,
    reference: Option<String>,
    reference_type: Option<String>,
    notes: Option<String>,
    metadata: Metadata,
    created_by: Option<UserId>,
    created_at: Option<DateTime<Utc>>,
    approved_by: Option<UserId>,
    approved_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_by: Option<UserId>,
    cancelled_at: Option<DateTime<Utc>>,
    cancel_reason: Option<String>,
    version: u64,
    created: bool,
}

impl InventoryMovement {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: MovementId, key: StockKey) -> Self {
        Self {
            id,
            key,
            movement_type: MovementType::Inbound,
            status: MovementStatus::Pending,
            quantity: 0,
            unit_cost: 0,
            total_cost: 0,
            reference: None,
            reference_type: None,
            notes: None,
            metadata: Metadata::default(),
            created_by: None,
            created_at: None,
            approved_by: None,
            approved_at: None,
            completed_at: None,
            cancelled_by: None,
            cancelled_at: None,
            cancel_reason: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> MovementId {
        self.id
    }

    pub fn key(&self) -> StockKey {
        self.key
    }

    pub fn movement_type(&self) -> MovementType {
        self.movement_type
    }

    pub fn status(&self) -> MovementStatus {
        self.status
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn unit_cost(&self) -> i64 {
        self.unit_cost
    }

    pub fn total_cost(&self) -> i64 {
        self.total_cost
    }

    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn reference_type(&self) -> Option<&str> {
        self.reference_type.as_deref()
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn created_by(&self) -> Option<UserId> {
        self.created_by
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn approved_by(&self) -> Option<UserId> {
        self.approved_by
    }

    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn cancelled_by(&self) -> Option<UserId> {
        self.cancelled_by
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Only Pending movements may be removed.
    pub fn ensure_deletable(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.status != MovementStatus::Pending {
            return Err(DomainError::invalid_state(format!(
                "cannot delete a {} movement",
                self.status.as_str()
            )));
        }
        Ok(())
    }
}

impl AggregateRoot for InventoryMovement {
    type Id = MovementId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateMovement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateMovement {
    pub movement_id: MovementId,
    pub key: StockKey,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub unit_cost: i64,
    pub reference: Option<String>,
    pub reference_type: Option<String>,
    pub notes: Option<String>,
    pub metadata: Metadata,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateMovement. `None` leaves a field as is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMovement {
    pub movement_id: MovementId,
    pub unit_cost: Option<i64>,
    pub reference: Option<String>,
    pub reference_type: Option<String>,
    pub notes: Option<String>,
    pub metadata: Option<Metadata>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApproveMovement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveMovement {
    pub movement_id: MovementId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteMovement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteMovement {
    pub movement_id: MovementId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelMovement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelMovement {
    pub movement_id: MovementId,
    pub cancelled_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementCommand {
    CreateMovement(CreateMovement),
    UpdateMovement(UpdateMovement),
    ApproveMovement(ApproveMovement),
    CompleteMovement(CompleteMovement),
    CancelMovement(CancelMovement),
}

/// Event: MovementCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementCreated {
    pub movement_id: MovementId,
    pub key: StockKey,
    pub movement_type: MovementType,
    pub quantity: i64,
    pub unit_cost: i64,
    pub total_cost: i64,
    pub reference: Option<String>,
    pub reference_type: Option<String>,
    pub notes: Option<String>,
    pub metadata: Metadata,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MovementUpdated (fields already merged).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementUpdated {
    pub movement_id: MovementId,
    pub unit_cost: i64,
    pub total_cost: i64,
    pub reference: Option<String>,
    pub reference_type: Option<String>,
    pub notes: Option<String>,
    pub metadata: Metadata,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MovementApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementApproved {
    pub movement_id: MovementId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MovementCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementCompleted {
    pub movement_id: MovementId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: MovementCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementCancelled {
    pub movement_id: MovementId,
    pub cancelled_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MovementEvent {
    MovementCreated(MovementCreated),
    MovementUpdated(MovementUpdated),
    MovementApproved(MovementApproved),
    MovementCompleted(MovementCompleted),
    MovementCancelled(MovementCancelled),
}

impl Event for MovementEvent {
    fn event_type(&self) -> &'static str {
        match self {
            MovementEvent::MovementCreated(_) => "inventory.movement.created",
            MovementEvent::MovementUpdated(_) => "inventory.movement.updated",
            MovementEvent::MovementApproved(_) => "inventory.movement.approved",
            MovementEvent::MovementCompleted(_) => "inventory.movement.completed",
            MovementEvent::MovementCancelled(_) => "inventory.movement.cancelled",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            MovementEvent::MovementCreated(e) => e.occurred_at,
            MovementEvent::MovementUpdated(e) => e.occurred_at,
            MovementEvent::MovementApproved(e) => e.occurred_at,
            MovementEvent::MovementCompleted(e) => e.occurred_at,
            MovementEvent::MovementCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for InventoryMovement {
    type Command = MovementCommand;
    type Event = MovementEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            MovementEvent::MovementCreated(e) => {
                self.id = e.movement_id;
                self.key = e.key;
                self.movement_type = e.movement_type;
                self.status = MovementStatus::Pending;
                self.quantity = e.quantity;
                self.unit_cost = e.unit_cost;
                self.total_cost = e.total_cost;
                self.reference = e.reference.clone();
                self.reference_type = e.reference_type.clone();
                self.notes = e.notes.clone();
                self.metadata = e.metadata.clone();
                self.created_by = Some(e.created_by);
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            MovementEvent::MovementUpdated(e) => {
                self.unit_cost = e.unit_cost;
                self.total_cost = e.total_cost;
                self.reference = e.reference.clone();
                self.reference_type = e.reference_type.clone();
                self.notes = e.notes.clone();
                self.metadata = e.metadata.clone();
            }
            MovementEvent::MovementApproved(e) => {
                self.status = MovementStatus::Approved;
                self.approved_by = Some(e.approved_by);
                self.approved_at = Some(e.occurred_at);
            }
            MovementEvent::MovementCompleted(e) => {
                self.status = MovementStatus::Completed;
                self.completed_at = Some(e.occurred_at);
            }
            MovementEvent::MovementCancelled(e) => {
                self.status = MovementStatus::Cancelled;
                self.cancelled_by = Some(e.cancelled_by);
                self.cancelled_at = Some(e.occurred_at);
                self.cancel_reason = Some(e.reason.clone());
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            MovementCommand::CreateMovement(cmd) => self.handle_create(cmd),
            MovementCommand::UpdateMovement(cmd) => self.handle_update(cmd),
            MovementCommand::ApproveMovement(cmd) => self.handle_approve(cmd),
            MovementCommand::CompleteMovement(cmd) => self.handle_complete(cmd),
            MovementCommand::CancelMovement(cmd) => self.handle_cancel(cmd),
        }
    }
}

fn total_cost(quantity: i64, unit_cost: i64) -> Result<i64, DomainError> {
    quantity
        .checked_mul(unit_cost)
        .ok_or_else(|| DomainError::validation("total_cost overflow"))
}

impl InventoryMovement {
    fn ensure_created(&self, movement_id: MovementId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != movement_id {
            return Err(DomainError::invariant("movement_id mismatch"));
        }
        Ok(())
    }

    fn ensure_transition(&self, next: MovementStatus) -> Result<(), DomainError> {
        if self.status.can_transition_to(next) {
            Ok(())
        } else {
            Err(DomainError::invalid_state(format!(
                "movement {} cannot move from {} to {}",
                self.id,
                self.status.as_str(),
                next.as_str()
            )))
        }
    }

    fn handle_create(&self, cmd: &CreateMovement) -> Result<Vec<MovementEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("movement already exists"));
        }

        match cmd.movement_type {
            MovementType::Adjustment if cmd.quantity < 0 => {
                return Err(DomainError::validation(
                    "adjustment quantity cannot be negative",
                ));
            }
            MovementType::Adjustment => {}
            _ if cmd.quantity <= 0 => {
                return Err(DomainError::validation("quantity must be positive"));
            }
            _ => {}
        }

        if cmd.unit_cost < 0 {
            return Err(DomainError::validation("unit_cost cannot be negative"));
        }

        Ok(vec![MovementEvent::MovementCreated(MovementCreated {
            movement_id: cmd.movement_id,
            key: cmd.key,
            movement_type: cmd.movement_type,
            quantity: cmd.quantity,
            unit_cost: cmd.unit_cost,
            total_cost: total_cost(cmd.quantity, cmd.unit_cost)?,
            reference: cmd.reference.clone(),
            reference_type: cmd.reference_type.clone(),
            notes: cmd.notes.clone(),
            metadata: cmd.metadata.clone(),
            created_by: cmd.created_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateMovement) -> Result<Vec<MovementEvent>, DomainError> {
        self.ensure_created(cmd.movement_id)?;

        if self.status != MovementStatus::Pending {
            return Err(DomainError::invalid_state(format!(
                "cannot edit a {} movement",
                self.status.as_str()
            )));
        }

        let unit_cost = cmd.unit_cost.unwrap_or(self.unit_cost);
        if unit_cost < 0 {
            return Err(DomainError::validation("unit_cost cannot be negative"));
        }

        Ok(vec![MovementEvent::MovementUpdated(MovementUpdated {
            movement_id: cmd.movement_id,
            unit_cost,
            total_cost: total_cost(self.quantity, unit_cost)?,
            reference: cmd.reference.clone().or_else(|| self.reference.clone()),
            reference_type: cmd
                .reference_type
                .clone()
                .or_else(|| self.reference_type.clone()),
            notes: cmd.notes.clone().or_else(|| self.notes.clone()),
            metadata: cmd.metadata.clone().unwrap_or_else(|| self.metadata.clone()),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveMovement) -> Result<Vec<MovementEvent>, DomainError> {
        self.ensure_created(cmd.movement_id)?;
        self.ensure_transition(MovementStatus::Approved)?;

        Ok(vec![MovementEvent::MovementApproved(MovementApproved {
            movement_id: cmd.movement_id,
            approved_by: cmd.approved_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompleteMovement) -> Result<Vec<MovementEvent>, DomainError> {
        self.ensure_created(cmd.movement_id)?;
        self.ensure_transition(MovementStatus::Completed)?;

        Ok(vec![MovementEvent::MovementCompleted(MovementCompleted {
            movement_id: cmd.movement_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelMovement) -> Result<Vec<MovementEvent>, DomainError> {
        self.ensure_created(cmd.movement_id)?;
        self.ensure_transition(MovementStatus::Cancelled)?;

        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("cancellation reason cannot be empty"));
        }

        Ok(vec![MovementEvent::MovementCancelled(MovementCancelled {
            movement_id: cmd.movement_id,
            cancelled_by: cmd.cancelled_by,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
