use bimap::BiMap;
use num::PrimInt;
use std::hash::Hash;
use std::ops::AddAssign;

/// Data structure for tracking used surrogate keys, and handing out the next available one.
///
/// The core structure is a Bijective Mapping, [BiMap];
///     - on the left, a key, `PK`, of some integer type (i16, i32, etc.);
///     - on the right, an `Obj`: the natural key the surrogate stands for (an upper-cased name,
///     or an `(exchange, first, second)` id triple).
///
/// In tangent, there is the `next_key` variable; the lowest unused value of type `PK`, starting
/// from one, the way a `SERIAL` column does.
///
/// [BiMap]: bimap::BiMap
///
/// ----------------------------------------------------------------------------------------------
///
/// ## Example
/// ```rust
/// use bimap::BiMap;
/// use ccdump_spider::key_tracker::KeyTracker;
///
/// let mut bimap: BiMap<i32, String> = BiMap::new();
/// bimap.insert(1, "BTC".to_string());
/// bimap.insert(2, "ETH".to_string());
/// bimap.insert(4, "USDT".to_string());
///
/// let tracker = KeyTracker::from(bimap);
/// assert_eq!(tracker.see_next_key(), &3);
/// ```
#[derive(Debug, Clone)]
pub struct KeyTracker<PK, Obj>
where
    PK: Eq + Hash + PrimInt + AddAssign,
    Obj: Eq + Hash,
{
    pub bimap: BiMap<PK, Obj>,
    pub next_key: PK,
}

impl<PK, Obj> Default for KeyTracker<PK, Obj>
where
    PK: Eq + Hash + PrimInt + AddAssign,
    Obj: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::from(BiMap::new())
    }
}

impl<PK, Obj> KeyTracker<PK, Obj>
where
    PK: Eq + Hash + PrimInt + AddAssign,
    Obj: Eq + Hash + Clone,
{
    /// Turn a BiMap into a `KeyTracker`.
    pub fn from(bimap: BiMap<PK, Obj>) -> Self {
        let starting_key = Self::calc_lowest_key(&bimap);
        Self {
            bimap,
            next_key: starting_key,
        }
    }

    /// Finds the lowest available key, for some generic N, starting from 1.
    pub fn calc_lowest_key(map: &BiMap<PK, Obj>) -> PK {
        let mut next_key = PK::one();
        while map.contains_left(&next_key) {
            next_key += PK::one();
        }
        next_key
    }

    /// Set the next available key.
    pub fn calc_next_key(&mut self) {
        while self.bimap.contains_left(&self.next_key) {
            self.next_key += PK::one();
        }
    }

    /// Return the current `next_key`.
    pub fn see_next_key(&self) -> &PK {
        &self.next_key
    }

    /// Look up the key of an existing value, without inserting.
    pub fn key_of(&self, value: &Obj) -> Option<PK> {
        self.bimap.get_by_right(value).copied()
    }

    /// Look up the value behind a key.
    pub fn value_of(&self, key: &PK) -> Option<&Obj> {
        self.bimap.get_by_left(key)
    }

    pub fn len(&self) -> usize {
        self.bimap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bimap.is_empty()
    }

    /// Search the BiMap for an existing value;
    ///     - if it does exist, return the associated key.
    ///     - if it doesn't exist, insert the Value with the `next_key`, returning that key.
    ///
    /// ```rust
    /// use ccdump_spider::key_tracker::KeyTracker;
    ///
    /// let mut tracker: KeyTracker<i32, String> = KeyTracker::default();
    /// assert_eq!(tracker.transact("BTC".to_string()), 1);
    /// assert_eq!(tracker.transact("ETH".to_string()), 2);
    /// assert_eq!(tracker.transact("BTC".to_string()), 1);
    /// assert_eq!(tracker.see_next_key(), &3);
    /// ```
    pub fn transact(&mut self, value: Obj) -> PK {
        if let Some(key) = self.bimap.get_by_right(&value) {
            return *key;
        }

        let key = self.next_key;
        self.bimap.insert(key, value);
        self.calc_next_key();
        key
    }
}

//////////////////////////////////////////////////////////////
// -- TESTS --
//////////////////////////////////////////////////////////////
