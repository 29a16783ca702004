use std::fmt;
use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds.
pub type Ms = i64;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

pub type ItemId = Ulid;
pub type ReservationId = Ulid;

/// Opaque, already-verified identity of a reserving party.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CallerId(String);

impl CallerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CallerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Maximum concurrent reservations an item may hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Capacity {
    Unlimited,
    Bounded(NonZeroU32),
}

impl Default for Capacity {
    fn default() -> Self {
        Self::SINGLE
    }
}

impl Capacity {
    pub const SINGLE: Capacity = Capacity::Bounded(NonZeroU32::MIN);

    /// `None` for zero: a bounded capacity is always at least one.
    pub fn bounded(n: u32) -> Option<Self> {
        NonZeroU32::new(n).map(Capacity::Bounded)
    }

    pub fn limit(&self) -> Option<u32> {
        match self {
            Capacity::Unlimited => None,
            Capacity::Bounded(n) => Some(n.get()),
        }
    }

    /// Whether one more reservation fits on top of `reserved`.
    pub fn admits(&self, reserved: usize) -> bool {
        match self {
            Capacity::Unlimited => true,
            Capacity::Bounded(n) => reserved < n.get() as usize,
        }
    }

    pub fn is_full(&self, reserved: usize) -> bool {
        !self.admits(reserved)
    }

    pub fn remaining(&self, reserved: usize) -> Remaining {
        match self {
            Capacity::Unlimited => Remaining::Unlimited,
            Capacity::Bounded(n) => {
                Remaining::Count((n.get() as usize).saturating_sub(reserved) as u32)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Remaining {
    Unlimited,
    Count(u32),
}

/// Administrative description of a catalog item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSpec {
    pub name: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub category: Option<String>,
    pub recipient: Option<String>,
    pub priority: i32,
    pub capacity: Capacity,
    pub active: bool,
}

impl ItemSpec {
    /// Active, single-capacity item with no display metadata.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            url: None,
            category: None,
            recipient: None,
            priority: 0,
            capacity: Capacity::default(),
            active: true,
        }
    }

    pub fn with_capacity(mut self, capacity: Capacity) -> Self {
        self.capacity = capacity;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub item_id: ItemId,
    /// Absent for anonymous callers, who can never cancel.
    pub caller: Option<CallerId>,
    pub display_name: String,
    pub created_at: Ms,
}

#[derive(Debug, Clone)]
pub struct ItemState {
    pub id: ItemId,
    pub spec: ItemSpec,
    /// Created by the ad-hoc factory; deleted once its last reservation goes.
    pub ephemeral: bool,
    pub created_at: Ms,
    pub updated_at: Ms,
    /// Live reservations in creation order.
    pub reservations: Vec<Reservation>,
    /// Set under the write lock when the item is removed from the store.
    pub deleted: bool,
}

impl ItemState {
    pub fn new(id: ItemId, spec: ItemSpec, ephemeral: bool, created_at: Ms) -> Self {
        Self {
            id,
            spec,
            ephemeral,
            created_at,
            updated_at: created_at,
            reservations: Vec::new(),
            deleted: false,
        }
    }

    pub fn reserved_count(&self) -> usize {
        self.reservations.len()
    }

    /// Reservations stay sorted by `created_at`; equal timestamps keep arrival order.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.created_at <= reservation.created_at);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: ReservationId) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    /// The caller's most recent reservation on this item.
    pub fn latest_for(&self, caller: &CallerId) -> Option<&Reservation> {
        self.reservations
            .iter()
            .rev()
            .find(|r| r.caller.as_ref() == Some(caller))
    }

    /// Ephemeral and holding nothing: garbage.
    pub fn is_orphaned(&self) -> bool {
        self.ephemeral && self.reservations.is_empty()
    }
}

/// Committed state changes. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ItemCreated {
        id: ItemId,
        spec: ItemSpec,
        ephemeral: bool,
        created_at: Ms,
    },
    ItemUpdated {
        id: ItemId,
        spec: ItemSpec,
        updated_at: Ms,
    },
    ItemDeleted {
        id: ItemId,
    },
    ReservationPlaced {
        id: ReservationId,
        item_id: ItemId,
        caller: Option<CallerId>,
        display_name: String,
        created_at: Ms,
    },
    ReservationCancelled {
        id: ReservationId,
        item_id: ItemId,
    },
    ReservationsCleared {
        item_id: ItemId,
    },
}

impl Event {
    pub fn item_id(&self) -> ItemId {
        match self {
            Event::ItemCreated { id, .. }
            | Event::ItemUpdated { id, .. }
            | Event::ItemDeleted { id } => *id,
            Event::ReservationPlaced { item_id, .. }
            | Event::ReservationCancelled { item_id, .. }
            | Event::ReservationsCleared { item_id } => *item_id,
        }
    }
}

// ── Batch outcomes ───────────────────────────────────────────────

/// Why a single target of a batch was not reserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    NotFound,
    Inactive,
    CapacityExceeded,
    LimitExceeded,
    /// Storage kept failing after the retry budget was spent.
    Transient(String),
    /// The request was cancelled before this target was attempted.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub item_id: ItemId,
    pub reason: FailureReason,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub succeeded: Vec<ItemId>,
    pub failed: Vec<ItemFailure>,
    /// Set when the request carried an ad-hoc description and the item was created.
    pub created_item_id: Option<ItemId>,
}

impl BatchOutcome {
    pub fn failed_ids(&self) -> Vec<ItemId> {
        self.failed.iter().map(|f| f.item_id).collect()
    }

    pub fn failure_for(&self, item_id: &ItemId) -> Option<&FailureReason> {
        self.failed
            .iter()
            .find(|f| f.item_id == *item_id)
            .map(|f| &f.reason)
    }
}

/// Result of a successful self-service cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled {
    pub reservation_id: ReservationId,
    /// The item was ephemeral, became empty, and was deleted.
    pub item_removed: bool,
}

// ── Read projection ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationView {
    pub id: ReservationId,
    pub display_name: String,
    pub caller: Option<CallerId>,
    pub created_at: Ms,
}

impl From<&Reservation> for ReservationView {
    fn from(r: &Reservation) -> Self {
        Self {
            id: r.id,
            display_name: r.display_name.clone(),
            caller: r.caller.clone(),
            created_at: r.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemView {
    pub id: ItemId,
    pub name: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub category: Option<String>,
    pub recipient: Option<String>,
    pub priority: i32,
    pub active: bool,
    pub ephemeral: bool,
    pub capacity: Capacity,
    pub reserved_count: usize,
    pub remaining: Remaining,
    pub is_full: bool,
    pub my_reservation: Option<ReservationView>,
    pub reservations: Vec<ReservationView>,
    pub created_at: Ms,
}

impl ItemView {
    pub fn build(item: &ItemState, caller: Option<&CallerId>) -> Self {
        let reserved = item.reserved_count();
        let my_reservation = caller
            .and_then(|c| item.reservations.iter().find(|r| r.caller.as_ref() == Some(c)))
            .map(ReservationView::from);
        Self {
            id: item.id,
            name: item.spec.name.clone(),
            description: item.spec.description.clone(),
            url: item.spec.url.clone(),
            category: item.spec.category.clone(),
            recipient: item.spec.recipient.clone(),
            priority: item.spec.priority,
            active: item.spec.active,
            ephemeral: item.ephemeral,
            capacity: item.spec.capacity,
            reserved_count: reserved,
            remaining: item.spec.capacity.remaining(reserved),
            is_full: item.spec.capacity.is_full(reserved),
            my_reservation,
            reservations: item.reservations.iter().map(ReservationView::from).collect(),
            created_at: item.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reservation(created_at: Ms, caller: Option<&str>) -> Reservation {
        Reservation {
            id: Ulid::new(),
            item_id: Ulid::nil(),
            caller: caller.map(CallerId::new),
            display_name: "Ana".into(),
            created_at,
        }
    }

    #[test]
    fn capacity_zero_is_not_bounded() {
        assert_eq!(Capacity::bounded(0), None);
        assert_eq!(Capacity::bounded(3).and_then(|c| c.limit()), Some(3));
        assert_eq!(Capacity::default(), Capacity::SINGLE);
    }

    #[test]
    fn unlimited_never_full() {
        let cap = Capacity::Unlimited;
        assert!(cap.admits(1_000_000));
        assert!(!cap.is_full(1_000_000));
        assert_eq!(cap.remaining(7), Remaining::Unlimited);
    }

    #[test]
    fn remaining_saturates_at_zero() {
        let cap = Capacity::bounded(2).unwrap();
        assert_eq!(cap.remaining(5), Remaining::Count(0));
        assert!(cap.is_full(2));
    }

    #[test]
    fn reservations_stay_ordered() {
        let mut item = ItemState::new(Ulid::new(), ItemSpec::named("Lamp"), false, 0);
        item.insert_reservation(reservation(300, None));
        item.insert_reservation(reservation(100, None));
        item.insert_reservation(reservation(200, None));
        let times: Vec<Ms> = item.reservations.iter().map(|r| r.created_at).collect();
        assert_eq!(times, vec![100, 200, 300]);
    }

    #[test]
    fn latest_for_picks_most_recent() {
        let mut item = ItemState::new(Ulid::new(), ItemSpec::named("Mug"), false, 0);
        item.insert_reservation(reservation(100, Some("u1")));
        let later = reservation(200, Some("u1"));
        let later_id = later.id;
        item.insert_reservation(later);
        item.insert_reservation(reservation(300, Some("u2")));
        assert_eq!(item.latest_for(&CallerId::new("u1")).map(|r| r.id), Some(later_id));
        assert!(item.latest_for(&CallerId::new("u3")).is_none());
    }

    #[test]
    fn orphaned_only_when_ephemeral_and_empty() {
        let mut item = ItemState::new(Ulid::new(), ItemSpec::named("Kite"), true, 0);
        assert!(item.is_orphaned());
        item.insert_reservation(reservation(1, None));
        assert!(!item.is_orphaned());
        item.ephemeral = false;
        item.reservations.clear();
        assert!(!item.is_orphaned());
    }

    #[test]
    fn view_marks_callers_reservation() {
        let mut item = ItemState::new(Ulid::new(), ItemSpec::named("Book"), false, 0);
        item.spec.capacity = Capacity::bounded(2).unwrap();
        item.insert_reservation(reservation(1, Some("me")));
        let mine = ItemView::build(&item, Some(&CallerId::new("me")));
        assert!(mine.my_reservation.is_some());
        assert_eq!(mine.remaining, Remaining::Count(1));
        assert!(!mine.is_full);

        let theirs = ItemView::build(&item, Some(&CallerId::new("you")));
        assert!(theirs.my_reservation.is_none());
        assert_eq!(theirs.reservations.len(), 1);

        let anon = ItemView::build(&item, None);
        assert!(anon.my_reservation.is_none());
    }

    #[test]
    fn view_serializes_for_presentation() {
        let mut item = ItemState::new(Ulid::new(), ItemSpec::named("Vase"), true, 5);
        item.spec.capacity = Capacity::bounded(2).unwrap();
        item.insert_reservation(reservation(9, Some("me")));

        let json = serde_json::to_value(ItemView::build(&item, Some(&CallerId::new("me")))).unwrap();
        assert_eq!(json["id"], item.id.to_string());
        assert_eq!(json["capacity"], serde_json::json!({ "Bounded": 2 }));
        assert_eq!(json["remaining"], serde_json::json!({ "Count": 1 }));
        assert_eq!(json["ephemeral"], true);
        assert_eq!(json["my_reservation"]["caller"], "me");
        assert_eq!(json["reservations"][0]["display_name"], "Ana");

        let open = ItemView::build(&ItemState::new(Ulid::new(), ItemSpec::named("Card").with_capacity(Capacity::Unlimited), false, 0), None);
        let json = serde_json::to_value(open).unwrap();
        assert_eq!(json["remaining"], "Unlimited");
        assert!(json["my_reservation"].is_null());
    }

    proptest! {
        #[test]
        fn bounded_remaining_and_full_agree(limit in 1u32..500, reserved in 0usize..1000) {
            let cap = Capacity::bounded(limit).unwrap();
            let Remaining::Count(left) = cap.remaining(reserved) else {
                panic!("bounded capacity reported unlimited remaining");
            };
            prop_assert_eq!(left == 0, cap.is_full(reserved));
            prop_assert_eq!(cap.admits(reserved), reserved < limit as usize);
            prop_assert!(left <= limit);
        }
    }
}
