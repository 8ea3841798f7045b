//! Resolve-or-create of exchanges, currencies and pairs inside an open transaction.
//!
//! Each lookup reads first, then inserts with `ON CONFLICT DO NOTHING RETURNING id`; an insert
//! returning nothing lost the race to a concurrent transaction, so the row is read again.

use super::sql;
use crate::model::{normalise, ExchangeCurrencyPair, PairTuple};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Error, Transaction};
use tracing::trace;

/// `(id, created)`
async fn resolve(
    tx: &Transaction<'_>,
    select: &str,
    insert: &str,
    key: &[&(dyn ToSql + Sync)],
    values: &[&(dyn ToSql + Sync)],
) -> Result<(i32, bool), Error> {
    if let Some(row) = tx.query_opt(select, key).await? {
        return Ok((row.get(0), false));
    }
    if let Some(row) = tx.query_opt(insert, values).await? {
        return Ok((row.get(0), true));
    }
    let row = tx.query_one(select, key).await?;
    Ok((row.get(0), false))
}

pub(super) async fn resolve_currency(
    tx: &Transaction<'_>,
    name: &str,
) -> Result<Option<i32>, Error> {
    let Some(name) = normalise(name) else {
        return Ok(None);
    };
    let (id, _) = resolve(tx, sql::SELECT_CURRENCY, sql::INSERT_CURRENCY, &[&name], &[&name]).await?;
    Ok(Some(id))
}

pub(super) async fn resolve_exchange(
    tx: &Transaction<'_>,
    name: &str,
    is_exchange: bool,
) -> Result<Option<i32>, Error> {
    let Some(name) = normalise(name) else {
        return Ok(None);
    };
    let (id, _) = resolve(
        tx,
        sql::SELECT_EXCHANGE,
        sql::INSERT_EXCHANGE,
        &[&name],
        &[&name, &is_exchange],
    )
    .await?;
    Ok(Some(id))
}

/// Resolves the exchange and both currencies, then the pair itself; `None` for malformed
/// tuples. The flag reports whether the pair row was created by this call.
pub(super) async fn resolve_pair(
    tx: &Transaction<'_>,
    pair: &PairTuple,
    is_exchange: bool,
) -> Result<Option<(ExchangeCurrencyPair, bool)>, Error> {
    let Some((exchange, first, second)) = pair.normalised() else {
        trace!("skipping malformed pair {pair:?}");
        return Ok(None);
    };

    let (exchange_id, _) = resolve(
        tx,
        sql::SELECT_EXCHANGE,
        sql::INSERT_EXCHANGE,
        &[&exchange],
        &[&exchange, &is_exchange],
    )
    .await?;
    let (first_id, _) =
        resolve(tx, sql::SELECT_CURRENCY, sql::INSERT_CURRENCY, &[&first], &[&first]).await?;
    let (second_id, _) =
        resolve(tx, sql::SELECT_CURRENCY, sql::INSERT_CURRENCY, &[&second], &[&second]).await?;

    let triple: [&(dyn ToSql + Sync); 3] = [&exchange_id, &first_id, &second_id];
    let (id, created) = resolve(tx, sql::SELECT_PAIR, sql::INSERT_PAIR, &triple, &triple).await?;

    Ok(Some((
        ExchangeCurrencyPair {
            id,
            exchange_id,
            exchange,
            first_id,
            first,
            second_id,
            second,
        },
        created,
    )))
}
