use crate::limits::*;
use crate::model::*;

use super::EngineError;

fn char_len_within(s: &str, min: usize, max: usize) -> bool {
    let n = s.chars().count();
    n >= min && n <= max
}

/// Trimmed display name, 2–60 characters.
pub(crate) fn validate_display_name(raw: &str) -> Result<String, EngineError> {
    let name = raw.trim();
    if !char_len_within(name, MIN_DISPLAY_NAME_LEN, MAX_DISPLAY_NAME_LEN) {
        return Err(EngineError::InvalidInput("display name must be 2-60 characters"));
    }
    Ok(name.to_string())
}

/// Trimmed ad-hoc description, 3–200 characters.
pub(crate) fn validate_adhoc_description(raw: &str) -> Result<String, EngineError> {
    let description = raw.trim();
    if !char_len_within(description, MIN_ADHOC_DESCRIPTION_LEN, MAX_ADHOC_DESCRIPTION_LEN) {
        return Err(EngineError::InvalidInput("ad-hoc description must be 3-200 characters"));
    }
    Ok(description.to_string())
}

pub(crate) fn validate_spec(spec: &ItemSpec) -> Result<(), EngineError> {
    if !char_len_within(spec.name.trim(), 1, MAX_ITEM_NAME_LEN) {
        return Err(EngineError::InvalidInput("item name must be 1-200 characters"));
    }
    let long_text = [&spec.description, &spec.url, &spec.category, &spec.recipient]
        .into_iter()
        .flatten()
        .any(|s| s.chars().count() > MAX_TEXT_FIELD_LEN);
    if long_text {
        return Err(EngineError::LimitExceeded("item text field too long"));
    }
    Ok(())
}

/// Decide whether one more reservation fits. The caller holds the item's
/// write lock, so the answer stays true until its insert commits.
pub(crate) fn check_capacity(item: &ItemState) -> Result<(), EngineError> {
    if item.deleted {
        return Err(EngineError::NotFound(item.id));
    }
    if !item.spec.active {
        return Err(EngineError::Inactive(item.id));
    }
    match item.spec.capacity {
        Capacity::Bounded(n) if item.reserved_count() >= n.get() as usize => {
            Err(EngineError::CapacityExceeded {
                item_id: item.id,
                capacity: n.get(),
            })
        }
        Capacity::Unlimited if item.reserved_count() >= MAX_RESERVATIONS_PER_ITEM => {
            Err(EngineError::LimitExceeded("too many reservations on item"))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn item_with(capacity: Capacity, reserved: usize) -> ItemState {
        let mut item = ItemState::new(Ulid::new(), ItemSpec::named("Clock").with_capacity(capacity), false, 0);
        for i in 0..reserved {
            item.insert_reservation(Reservation {
                id: Ulid::new(),
                item_id: item.id,
                caller: None,
                display_name: "Bo".into(),
                created_at: i as Ms,
            });
        }
        item
    }

    #[test]
    fn display_name_is_trimmed_and_bounded() {
        assert_eq!(validate_display_name("  Ana  ").unwrap(), "Ana");
        assert!(validate_display_name(" A ").is_err());
        assert!(validate_display_name(&"x".repeat(61)).is_err());
        assert!(validate_display_name(&"x".repeat(60)).is_ok());
        // Counted in characters, not bytes.
        assert!(validate_display_name(&"é".repeat(60)).is_ok());
    }

    #[test]
    fn adhoc_description_bounds() {
        assert!(validate_adhoc_description("ab").is_err());
        assert_eq!(validate_adhoc_description(" abc ").unwrap(), "abc");
        assert!(validate_adhoc_description(&"d".repeat(201)).is_err());
    }

    #[test]
    fn spec_rejects_blank_name() {
        assert!(validate_spec(&ItemSpec::named("   ")).is_err());
        assert!(validate_spec(&ItemSpec::named("Scarf")).is_ok());
    }

    #[test]
    fn bounded_item_fills_up() {
        let cap = Capacity::bounded(2).unwrap();
        assert!(check_capacity(&item_with(cap, 1)).is_ok());
        assert!(matches!(
            check_capacity(&item_with(cap, 2)),
            Err(EngineError::CapacityExceeded { capacity: 2, .. })
        ));
    }

    #[test]
    fn unlimited_item_has_a_ceiling() {
        assert!(check_capacity(&item_with(Capacity::Unlimited, 50)).is_ok());
        assert!(matches!(
            check_capacity(&item_with(Capacity::Unlimited, MAX_RESERVATIONS_PER_ITEM)),
            Err(EngineError::LimitExceeded(_))
        ));
    }

    #[test]
    fn inactive_before_capacity() {
        let mut item = item_with(Capacity::SINGLE, 1);
        item.spec.active = false;
        assert!(matches!(check_capacity(&item), Err(EngineError::Inactive(_))));
    }
}
