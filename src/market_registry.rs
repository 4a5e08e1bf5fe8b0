//! MarketRegistry - symbol → order book
//!
//! Creation and lookup only; markets are never deleted. Each book sits
//! behind its own mutex so requests on different symbols run in parallel.
//!
//! Never hold a `DashMap` reference while locking a book: [`MarketRegistry::get`]
//! clones the `Arc` out of the shard before the caller locks it.

use crate::core_types::Symbol;
use crate::error::EngineError;
use crate::orderbook::OrderBook;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use std::sync::Arc;

/// A book shared between request threads
pub type SharedBook = Arc<Mutex<OrderBook>>;

#[derive(Debug, Default)]
pub struct MarketRegistry {
    books: DashMap<Symbol, SharedBook>,
}

impl MarketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install an empty book for `symbol`
    pub fn create(&self, symbol: &str) -> Result<(), EngineError> {
        validate_symbol(symbol)?;
        match self.books.entry(symbol.to_string()) {
            Entry::Occupied(_) => Err(EngineError::AlreadyExists(format!("market {}", symbol))),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(OrderBook::new())));
                Ok(())
            }
        }
    }

    pub fn get(&self, symbol: &str) -> Result<SharedBook, EngineError> {
        self.books
            .get(symbol)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| EngineError::UnknownSymbol(symbol.to_string()))
    }

    #[inline]
    pub fn contains(&self, symbol: &str) -> bool {
        self.books.contains_key(symbol)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.books.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.books.is_empty()
    }

    /// All symbols in ascending order (the lock order for multi-book reads)
    pub fn symbols(&self) -> Vec<Symbol> {
        let mut symbols: Vec<Symbol> = self.books.iter().map(|e| e.key().clone()).collect();
        symbols.sort();
        symbols
    }

    /// Install a pre-built book (snapshot restore)
    pub(crate) fn insert_book(&self, symbol: &str, book: OrderBook) -> Result<(), EngineError> {
        validate_symbol(symbol)?;
        match self.books.entry(symbol.to_string()) {
            Entry::Occupied(_) => Err(EngineError::AlreadyExists(format!("market {}", symbol))),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Mutex::new(book)));
                Ok(())
            }
        }
    }
}

fn validate_symbol(symbol: &str) -> Result<(), EngineError> {
    if symbol.is_empty() || symbol.chars().any(char::is_whitespace) {
        return Err(EngineError::InvalidSymbol(symbol.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_get() {
        let registry = MarketRegistry::new();
        registry.create("BTC-100K").unwrap();

        let book = registry.get("BTC-100K").unwrap();
        assert!(book.lock().is_empty());
        assert!(registry.contains("BTC-100K"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_create_twice() {
        let registry = MarketRegistry::new();
        registry.create("M").unwrap();
        assert_eq!(
            registry.create("M"),
            Err(EngineError::AlreadyExists("market M".into()))
        );
    }

    #[test]
    fn test_unknown_symbol() {
        let registry = MarketRegistry::new();
        assert!(matches!(
            registry.get("nope"),
            Err(EngineError::UnknownSymbol(s)) if s == "nope"
        ));
    }

    #[test]
    fn test_invalid_symbol() {
        let registry = MarketRegistry::new();
        assert!(matches!(
            registry.create(""),
            Err(EngineError::InvalidSymbol(_))
        ));
        assert!(matches!(
            registry.create("two words"),
            Err(EngineError::InvalidSymbol(_))
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_symbols_sorted() {
        let registry = MarketRegistry::new();
        for s in ["c", "a", "b"] {
            registry.create(s).unwrap();
        }
        assert_eq!(registry.symbols(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_same_book_shared() {
        let registry = MarketRegistry::new();
        registry.create("M").unwrap();
        let a = registry.get("M").unwrap();
        let b = registry.get("M").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
