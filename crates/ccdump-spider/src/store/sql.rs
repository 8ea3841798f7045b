///////////////////////////////////////////////////////
// schema
///////////////////////////////////////////////////////

/// Idempotent DDL for the `crypto` schema; names are stored upper-cased, every natural key has
/// a uniqueness constraint.
pub(crate) const CREATE_SCHEMA: &str = "
    CREATE SCHEMA IF NOT EXISTS crypto;

    CREATE TABLE IF NOT EXISTS crypto.exchanges (
        id SERIAL PRIMARY KEY,
        name VARCHAR NOT NULL UNIQUE CHECK (name = UPPER(name)),
        is_exchange BOOLEAN NOT NULL DEFAULT TRUE
    );

    CREATE TABLE IF NOT EXISTS crypto.currencies (
        id SERIAL PRIMARY KEY,
        name VARCHAR NOT NULL UNIQUE CHECK (name = UPPER(name))
    );

    CREATE TABLE IF NOT EXISTS crypto.exchange_currency_pairs (
        id SERIAL PRIMARY KEY,
        exchange_id INT NOT NULL REFERENCES crypto.exchanges (id),
        first_id INT NOT NULL REFERENCES crypto.currencies (id),
        second_id INT NOT NULL REFERENCES crypto.currencies (id),
        UNIQUE (exchange_id, first_id, second_id),
        CHECK (first_id <> second_id)
    );

    CREATE TABLE IF NOT EXISTS crypto.tickers (
        exchange_pair_id INT NOT NULL REFERENCES crypto.exchange_currency_pairs (id),
        start_time TIMESTAMP WITH TIME ZONE NOT NULL,
        response_time TIMESTAMP WITH TIME ZONE NOT NULL,
        last_price DOUBLE PRECISION,
        last_trade DOUBLE PRECISION,
        best_ask DOUBLE PRECISION,
        best_bid DOUBLE PRECISION,
        daily_volume DOUBLE PRECISION,
        PRIMARY KEY (exchange_pair_id, start_time)
    );

    CREATE TABLE IF NOT EXISTS crypto.historic_rates (
        exchange_pair_id INT NOT NULL REFERENCES crypto.exchange_currency_pairs (id),
        timestamp TIMESTAMP WITH TIME ZONE NOT NULL,
        open DOUBLE PRECISION,
        high DOUBLE PRECISION,
        low DOUBLE PRECISION,
        close DOUBLE PRECISION,
        volume DOUBLE PRECISION,
        PRIMARY KEY (exchange_pair_id, timestamp)
    );

    CREATE TABLE IF NOT EXISTS crypto.order_books (
        exchange_pair_id INT NOT NULL REFERENCES crypto.exchange_currency_pairs (id),
        timestamp TIMESTAMP WITH TIME ZONE NOT NULL,
        position INT NOT NULL,
        bids_price DOUBLE PRECISION,
        bids_amount DOUBLE PRECISION,
        asks_price DOUBLE PRECISION,
        asks_amount DOUBLE PRECISION,
        PRIMARY KEY (exchange_pair_id, timestamp, position)
    );

    CREATE TABLE IF NOT EXISTS crypto.trades (
        exchange_pair_id INT NOT NULL REFERENCES crypto.exchange_currency_pairs (id),
        trade_id VARCHAR NOT NULL,
        timestamp TIMESTAMP WITH TIME ZONE NOT NULL,
        direction VARCHAR NOT NULL,
        price DOUBLE PRECISION,
        amount DOUBLE PRECISION,
        PRIMARY KEY (exchange_pair_id, trade_id)
    );

    CREATE TABLE IF NOT EXISTS crypto.ohlcvm (
        exchange_pair_id INT NOT NULL REFERENCES crypto.exchange_currency_pairs (id),
        timestamp TIMESTAMP WITH TIME ZONE NOT NULL,
        open DOUBLE PRECISION,
        high DOUBLE PRECISION,
        low DOUBLE PRECISION,
        close DOUBLE PRECISION,
        volume DOUBLE PRECISION,
        market_cap DOUBLE PRECISION,
        PRIMARY KEY (exchange_pair_id, timestamp)
    );

    CREATE OR REPLACE VIEW crypto.exchange_currency_pairs_view AS
        SELECT p.id, e.name AS exchange_name, f.name AS first_name, s.name AS second_name
        FROM crypto.exchange_currency_pairs p
        INNER JOIN crypto.exchanges e ON e.id = p.exchange_id
        INNER JOIN crypto.currencies f ON f.id = p.first_id
        INNER JOIN crypto.currencies s ON s.id = p.second_id;
";

///////////////////////////////////////////////////////
// identities
///////////////////////////////////////////////////////

pub(crate) const SELECT_EXCHANGE: &str = "
    SELECT id FROM crypto.exchanges WHERE name = $1
";

/// returns no row when a concurrent transaction got there first
pub(crate) const INSERT_EXCHANGE: &str = "
    INSERT INTO crypto.exchanges (name, is_exchange)
    VALUES ($1, $2)
    ON CONFLICT (name)
    DO NOTHING
    RETURNING id
";

pub(crate) const SELECT_CURRENCY: &str = "
    SELECT id FROM crypto.currencies WHERE name = $1
";

pub(crate) const INSERT_CURRENCY: &str = "
    INSERT INTO crypto.currencies (name)
    VALUES ($1)
    ON CONFLICT (name)
    DO NOTHING
    RETURNING id
";

pub(crate) const SELECT_PAIR: &str = "
    SELECT id FROM crypto.exchange_currency_pairs
    WHERE exchange_id = $1 AND first_id = $2 AND second_id = $3
";

pub(crate) const INSERT_PAIR: &str = "
    INSERT INTO crypto.exchange_currency_pairs (exchange_id, first_id, second_id)
    VALUES ($1, $2, $3)
    ON CONFLICT (exchange_id, first_id, second_id)
    DO NOTHING
    RETURNING id
";

/// `$2` selects everything; otherwise the union of first currencies (`$3`), second currencies
/// (`$4`) and exact pairs (`$5`, `$6`, column-wise), always within exchange `$1`.
pub(crate) const SELECT_PAIRS_FOR_EXCHANGE: &str = "
    SELECT p.id, p.exchange_id, e.name, p.first_id, f.name, p.second_id, s.name
    FROM crypto.exchange_currency_pairs p
    INNER JOIN crypto.exchanges e ON e.id = p.exchange_id
    INNER JOIN crypto.currencies f ON f.id = p.first_id
    INNER JOIN crypto.currencies s ON s.id = p.second_id
    WHERE e.name = $1
      AND (
        $2::BOOLEAN
        OR f.name = ANY($3::VARCHAR[])
        OR s.name = ANY($4::VARCHAR[])
        OR (f.name, s.name) IN (SELECT * FROM UNNEST($5::VARCHAR[], $6::VARCHAR[]))
      )
    ORDER BY p.id
";

///////////////////////////////////////////////////////
// facts
///////////////////////////////////////////////////////

/// duplicates within a round are a caller error, and fail the batch
pub(crate) const INSERT_TICKER: &str = "
    INSERT INTO crypto.tickers (
        exchange_pair_id,
        start_time,
        response_time,
        last_price,
        last_trade,
        best_ask,
        best_bid,
        daily_volume
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
";

pub(crate) const EXISTS_HISTORIC_RATE: &str = "
    SELECT 1 FROM crypto.historic_rates
    WHERE exchange_pair_id = $1 AND timestamp = $2
";

pub(crate) const INSERT_HISTORIC_RATE: &str = "
    INSERT INTO crypto.historic_rates (exchange_pair_id, timestamp, open, high, low, close, volume)
    VALUES ($1, $2, $3, $4, $5, $6, $7)
";

pub(crate) const INSERT_ORDER_BOOK: &str = "
    INSERT INTO crypto.order_books (
        exchange_pair_id,
        timestamp,
        position,
        bids_price,
        bids_amount,
        asks_price,
        asks_amount
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7)
    ON CONFLICT (exchange_pair_id, timestamp, position)
    DO NOTHING
";

pub(crate) const INSERT_TRADE: &str = "
    INSERT INTO crypto.trades (exchange_pair_id, trade_id, timestamp, direction, price, amount)
    VALUES ($1, $2, $3, $4, $5, $6)
    ON CONFLICT (exchange_pair_id, trade_id)
    DO NOTHING
";

pub(crate) const INSERT_OHLCVM: &str = "
    INSERT INTO crypto.ohlcvm (
        exchange_pair_id,
        timestamp,
        open,
        high,
        low,
        close,
        volume,
        market_cap
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
    ON CONFLICT (exchange_pair_id, timestamp)
    DO NOTHING
";

///////////////////////////////////////////////////////
// reading back
///////////////////////////////////////////////////////

/// `$1` selects every exchange, otherwise those in `$2`; `$3`..`$7` select pairs like
/// [`SELECT_PAIRS_FOR_EXCHANGE`]; `$8`/`$9` bound `start_time` when not null.
pub(crate) const SELECT_READABLE_TICKERS: &str = "
    SELECT
        v.exchange_name,
        v.first_name,
        v.second_name,
        t.start_time,
        t.response_time,
        t.last_price,
        t.last_trade,
        t.best_ask,
        t.best_bid,
        t.daily_volume
    FROM crypto.tickers t
    INNER JOIN crypto.exchange_currency_pairs_view v ON v.id = t.exchange_pair_id
    WHERE ($1::BOOLEAN OR v.exchange_name = ANY($2::VARCHAR[]))
      AND (
        $3::BOOLEAN
        OR v.first_name = ANY($4::VARCHAR[])
        OR v.second_name = ANY($5::VARCHAR[])
        OR (v.first_name, v.second_name) IN (SELECT * FROM UNNEST($6::VARCHAR[], $7::VARCHAR[]))
      )
      AND ($8::TIMESTAMPTZ IS NULL OR t.start_time >= $8)
      AND ($9::TIMESTAMPTZ IS NULL OR t.start_time <= $9)
    ORDER BY t.exchange_pair_id, t.start_time
";
