use arrow::{
    array::{Array, ArrayRef, Decimal128Array, StringArray},
    datatypes::{DataType, Field, Schema, SchemaRef},
    record_batch::RecordBatch,
};
use rust_decimal::Decimal;
use std::{collections::BTreeMap, sync::Arc};

use super::CacheError;
use crate::record::LineItem;

const ENERGY_TYPE: &str = "energy_type";
const CHARGE_AMOUNT: &str = "charge_amount";
const META: &str = "meta";

/// Item columns. The amount scale is per file: the largest scale among the
/// items, so no amount loses digits.
pub(super) fn item_schema(scale: u32) -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new(ENERGY_TYPE, DataType::Utf8, false),
        Field::new(CHARGE_AMOUNT, DataType::Decimal128(38, scale as i8), false),
        Field::new(META, DataType::Utf8, false),
    ]))
}

pub(super) fn items_to_batch(items: &[LineItem]) -> Result<RecordBatch, CacheError> {
    let scale = items
        .iter()
        .map(|i| i.charge_amount.scale())
        .max()
        .unwrap_or(0);

    let energy_types = StringArray::from_iter_values(items.iter().map(|i| i.energy_type.as_str()));
    let mantissas: Vec<i128> = items
        .iter()
        .map(|i| {
            let mut amount = i.charge_amount;
            amount.rescale(scale);
            amount.mantissa()
        })
        .collect();
    let amounts = Decimal128Array::from(mantissas).with_precision_and_scale(38, scale as i8)?;
    let metas = items
        .iter()
        .map(|i| serde_json::to_string(&i.meta))
        .collect::<Result<Vec<_>, _>>()?;

    let columns: Vec<ArrayRef> = vec![
        Arc::new(energy_types),
        Arc::new(amounts),
        Arc::new(StringArray::from(metas)),
    ];
    Ok(RecordBatch::try_new(item_schema(scale), columns)?)
}

pub(super) fn batch_to_items(batch: &RecordBatch, key: &str) -> Result<Vec<LineItem>, CacheError> {
    let energy_types = column::<StringArray>(batch, ENERGY_TYPE, key)?;
    let amounts = column::<Decimal128Array>(batch, CHARGE_AMOUNT, key)?;
    let metas = column::<StringArray>(batch, META, key)?;
    let scale = u32::try_from(amounts.scale())
        .map_err(|_| CacheError::corrupt(key, "negative decimal scale"))?;

    let mut items = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        if energy_types.is_null(row) || amounts.is_null(row) || metas.is_null(row) {
            return Err(CacheError::corrupt(key, format!("null value in row {}", row)));
        }
        let charge_amount = Decimal::try_from_i128_with_scale(amounts.value(row), scale)
            .map_err(|e| CacheError::corrupt(key, format!("row {}: {}", row, e)))?;
        let meta: BTreeMap<String, String> = serde_json::from_str(metas.value(row))?;
        items.push(LineItem {
            energy_type: energy_types.value(row).to_string(),
            charge_amount,
            meta,
        });
    }
    Ok(items)
}

fn column<'a, T: Array + 'static>(
    batch: &'a RecordBatch,
    name: &str,
    key: &str,
) -> Result<&'a T, CacheError> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| CacheError::corrupt(key, format!("missing or mistyped column `{}`", name)))
}
