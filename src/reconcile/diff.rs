use rust_decimal::Decimal;
use serde::Serialize;
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};

use crate::normalize::secondary_value;
use crate::record::{DateRange, LineItem, PeriodRecord};

/// How line items are matched between two snapshots of a period.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ItemKey {
    pub energy_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<String>,
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.secondary {
            Some(s) => write!(f, "{} [{}]", self.energy_type, s),
            None => f.write_str(&self.energy_type),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemAmount {
    pub key: ItemKey,
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemChange {
    pub key: ItemKey,
    pub before: Decimal,
    pub after: Decimal,
    /// Amount may be equal; only the non-amount columns moved.
    pub meta_changed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RangeChange {
    pub before: DateRange,
    pub after: DateRange,
}

/// What changed between the cached and the fresh snapshot of a period.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub added: Vec<ItemAmount>,
    pub removed: Vec<ItemAmount>,
    pub changed: Vec<ItemChange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_changed: Option<RangeChange>,
}

impl DiffSummary {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.removed.is_empty()
            && self.changed.is_empty()
            && self.range_changed.is_none()
    }

    /// First change recorded for `energy_type`, whatever its secondary key.
    pub fn change_for(&self, energy_type: &str) -> Option<&ItemChange> {
        self.changed
            .iter()
            .find(|c| c.key.energy_type == energy_type)
    }
}

impl fmt::Display for DiffSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(r) = &self.range_changed {
            parts.push(format!("range {} -> {}", r.before, r.after));
        }
        for c in &self.changed {
            if c.before == c.after {
                parts.push(format!("{}: meta changed", c.key));
            } else {
                parts.push(format!("{}: {} -> {}", c.key, c.before, c.after));
            }
        }
        parts.extend(self.added.iter().map(|a| format!("+{}: {}", a.key, a.amount)));
        parts.extend(self.removed.iter().map(|r| format!("-{}: {}", r.key, r.amount)));
        if parts.is_empty() {
            f.write_str("no changes")
        } else {
            f.write_str(&parts.join("; "))
        }
    }
}

#[derive(Default)]
struct Group<'a> {
    amount: Decimal,
    metas: Vec<&'a BTreeMap<String, String>>,
}

fn group<'a>(items: &'a [LineItem], secondary_key: Option<&str>) -> BTreeMap<ItemKey, Group<'a>> {
    let mut groups: BTreeMap<ItemKey, Group<'a>> = BTreeMap::new();
    for item in items {
        let key = ItemKey {
            energy_type: item.energy_type.clone(),
            secondary: secondary_key
                .and_then(|h| secondary_value(item, h))
                .map(str::to_string),
        };
        let g = groups.entry(key).or_default();
        g.amount = g.amount.saturating_add(item.charge_amount);
        g.metas.push(&item.meta);
    }
    for g in groups.values_mut() {
        g.metas.sort();
    }
    groups
}

/// Compare two snapshots. Items are matched by energy type plus the
/// secondary key value; several items under one key are compared as a sum.
pub fn diff(cached: &PeriodRecord, fresh: &PeriodRecord, secondary_key: Option<&str>) -> DiffSummary {
    let before = group(cached.line_items(), secondary_key);
    let after = group(fresh.line_items(), secondary_key);
    let keys: BTreeSet<&ItemKey> = before.keys().chain(after.keys()).collect();

    let mut summary = DiffSummary::default();
    for key in keys {
        match (before.get(key), after.get(key)) {
            (Some(b), Some(a)) => {
                let meta_changed = b.metas != a.metas;
                if b.amount != a.amount || meta_changed {
                    summary.changed.push(ItemChange {
                        key: key.clone(),
                        before: b.amount,
                        after: a.amount,
                        meta_changed,
                    });
                }
            }
            (Some(b), None) => summary.removed.push(ItemAmount {
                key: key.clone(),
                amount: b.amount,
            }),
            (None, Some(a)) => summary.added.push(ItemAmount {
                key: key.clone(),
                amount: a.amount,
            }),
            (None, None) => {}
        }
    }

    if cached.date_range() != fresh.date_range() {
        summary.range_changed = Some(RangeChange {
            before: *cached.date_range(),
            after: *fresh.date_range(),
        });
    }
    summary
}
