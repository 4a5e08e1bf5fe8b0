use outcome_exchange::{
    CashView, EngineError, FillKind, MatchingEngine, OrderKind, OrderRequest, Outcome, UserId,
};

const A: UserId = 1;
const B: UserId = 2;
const C: UserId = 3;

fn engine() -> MatchingEngine {
    let engine = MatchingEngine::with_par(1000).unwrap();
    engine.create_market("M").unwrap();
    engine
}

fn user(engine: &MatchingEngine, id: UserId, cash: u64) {
    engine.create_user(id).unwrap();
    if cash > 0 {
        engine.deposit(id, cash).unwrap();
    }
}

#[test]
fn qa_sell_then_buy_partially_consumes_resting_offer() {
    let engine = engine();
    user(&engine, A, 10_000);
    engine.credit_shares(A, "M", Outcome::Yes, 50).unwrap();
    engine
        .submit_order(&OrderRequest::sell(A, "M", Outcome::Yes, 400, 50))
        .unwrap();

    // 30 @ 400 costs 12_000, more than a 10_000 deposit
    user(&engine, B, 20_000);
    let b_before = engine.cash(B).unwrap().available;
    let a_before = engine.cash(A).unwrap().available;

    let report = engine
        .submit_order(&OrderRequest::buy(B, "M", Outcome::Yes, 400, 30))
        .unwrap();

    assert_eq!(report.fills.len(), 1);
    assert_eq!((report.fills[0].qty, report.fills[0].price), (30, 400));
    assert_eq!(report.fills[0].counterparty, A);

    let book = engine.order_book("M").unwrap();
    let level = book.level(Outcome::Yes, 400).unwrap();
    assert_eq!(level.total_qty, 20);
    assert_eq!(level.orders[0].owner, A);

    let b_yes = engine.positions(B).unwrap();
    assert_eq!((b_yes[0].outcome, b_yes[0].available), (Outcome::Yes, 30));
    assert_eq!(b_before - engine.cash(B).unwrap().available, 12_000);
    assert_eq!(engine.cash(A).unwrap().available - a_before, 12_000);
    engine.audit().unwrap();
}

#[test]
fn qa_unmatched_buy_creates_complementary_offer() {
    let engine = engine();
    user(&engine, C, 10_000);

    let report = engine
        .submit_order(&OrderRequest::buy(C, "M", Outcome::Yes, 600, 10))
        .unwrap();
    assert!(report.fills.is_empty());

    let book = engine.order_book("M").unwrap();
    assert!(book.yes.is_empty());
    let level = book.level(Outcome::No, 400).unwrap();
    assert_eq!(level.total_qty, 10);
    assert_eq!(level.orders[0].kind, OrderKind::Complementary);
    assert_eq!(engine.cash(C).unwrap().locked, 6_000);
    engine.audit().unwrap();
}

#[test]
fn qa_fifo_within_level_and_queue_position_kept_on_growth() {
    let engine = engine();
    for id in [A, B] {
        user(&engine, id, 0);
        engine.credit_shares(id, "M", Outcome::Yes, 20).unwrap();
    }
    user(&engine, C, 100_000);

    engine
        .submit_order(&OrderRequest::sell(A, "M", Outcome::Yes, 500, 5))
        .unwrap();
    engine
        .submit_order(&OrderRequest::sell(B, "M", Outcome::Yes, 500, 5))
        .unwrap();
    // A grows its entry; it stays ahead of B
    engine
        .submit_order(&OrderRequest::sell(A, "M", Outcome::Yes, 500, 5))
        .unwrap();
    let level = engine.order_book("M").unwrap().yes[0].clone();
    assert_eq!(level.orders.len(), 2);
    assert_eq!((level.orders[0].owner, level.orders[0].qty), (A, 10));

    let report = engine
        .submit_order(&OrderRequest::buy(C, "M", Outcome::Yes, 500, 12))
        .unwrap();
    let fills: Vec<(UserId, u64)> = report.fills.iter().map(|f| (f.counterparty, f.qty)).collect();
    assert_eq!(fills, vec![(A, 10), (B, 2)]);
    engine.audit().unwrap();
}

#[test]
fn qa_buy_sweeps_transfer_and_mint_liquidity() {
    let engine = engine();
    user(&engine, A, 0);
    user(&engine, B, 10_000);
    user(&engine, C, 10_000);
    engine.credit_shares(A, "M", Outcome::No, 5).unwrap();

    // NEW NO offer @ 250 from A; complementary NO offer @ 300 from B (YES bid @ 700)
    engine
        .submit_order(&OrderRequest::sell(A, "M", Outcome::No, 250, 5))
        .unwrap();
    engine
        .submit_order(&OrderRequest::buy(B, "M", Outcome::Yes, 700, 5))
        .unwrap();

    let report = engine
        .submit_order(&OrderRequest::buy(C, "M", Outcome::No, 300, 8))
        .unwrap();
    let kinds: Vec<(FillKind, u64, u64)> =
        report.fills.iter().map(|f| (f.kind, f.price, f.qty)).collect();
    assert_eq!(
        kinds,
        vec![(FillKind::Transfer, 250, 5), (FillKind::Mint, 300, 3)]
    );
    // 5 @ 250 + 3 @ 300, refund 5 * 50
    assert_eq!(report.released_cash, 250);
    assert_eq!(
        engine.cash(C).unwrap(),
        CashView {
            available: 10_000 - 1_250 - 900,
            locked: 0
        }
    );
    assert_eq!(engine.ledger().collateral("M"), 3_000);
    assert_eq!(engine.order_book("M").unwrap().level(Outcome::No, 300).unwrap().total_qty, 2);
    engine.audit().unwrap();
}

#[test]
fn qa_sell_walks_bids_best_first() {
    let engine = engine();
    user(&engine, A, 10_000);
    user(&engine, B, 10_000);
    user(&engine, C, 0);
    engine.credit_shares(C, "M", Outcome::Yes, 20).unwrap();

    // YES bids 600 (A) and 650 (B) rest as NO @ 400 and NO @ 350
    engine
        .submit_order(&OrderRequest::buy(A, "M", Outcome::Yes, 600, 10))
        .unwrap();
    engine
        .submit_order(&OrderRequest::buy(B, "M", Outcome::Yes, 650, 10))
        .unwrap();

    let report = engine
        .submit_order(&OrderRequest::sell(C, "M", Outcome::Yes, 600, 20))
        .unwrap();
    let fills: Vec<(UserId, u64)> = report.fills.iter().map(|f| (f.counterparty, f.price)).collect();
    assert_eq!(fills, vec![(B, 650), (A, 600)]);
    assert!(report.is_filled());
    assert_eq!(engine.cash(C).unwrap().available, 12_500);
    assert!(engine.order_book("M").unwrap().is_empty());
    engine.audit().unwrap();
}

#[test]
fn qa_rejected_order_changes_nothing() {
    let engine = engine();
    user(&engine, A, 5_000);
    user(&engine, B, 0);
    engine.credit_shares(B, "M", Outcome::Yes, 10).unwrap();
    engine
        .submit_order(&OrderRequest::sell(B, "M", Outcome::Yes, 450, 10))
        .unwrap();

    let books_before = engine.order_books();
    let cash_before = engine.all_cash();
    let positions_before = engine.positions(B).unwrap();

    let rejects = [
        OrderRequest::buy(A, "M", Outcome::Yes, 500, 11),
        OrderRequest::buy(A, "M", Outcome::Yes, 1000, 1),
        OrderRequest::buy(A, "Z", Outcome::Yes, 500, 1),
        OrderRequest::sell(A, "M", Outcome::Yes, 500, 1),
        OrderRequest::buy(99, "M", Outcome::Yes, 500, 1),
    ];
    for req in &rejects {
        assert!(engine.submit_order(req).is_err(), "{:?}", req);
    }

    assert_eq!(engine.order_books(), books_before);
    assert_eq!(engine.all_cash(), cash_before);
    assert_eq!(engine.positions(B).unwrap(), positions_before);
    engine.audit().unwrap();
}

#[test]
fn qa_error_variants() {
    let engine = engine();
    user(&engine, A, 100);

    assert!(matches!(
        engine.create_market("M"),
        Err(EngineError::AlreadyExists(_))
    ));
    assert!(matches!(engine.create_user(A), Err(EngineError::AlreadyExists(_))));
    assert_eq!(engine.cash(42), Err(EngineError::UnknownUser(42)));
    assert!(matches!(
        engine.order_book("nope"),
        Err(EngineError::UnknownSymbol(_))
    ));
    assert!(matches!(
        engine.deposit(A, 0),
        Err(EngineError::InvalidAmount(_))
    ));
    assert_eq!(
        engine.submit_order(&OrderRequest::buy(A, "M", Outcome::No, 50, 3)),
        Err(EngineError::InsufficientFunds {
            required: 150,
            available: 100
        })
    );
}

#[test]
fn qa_invariant_violation_aborts_whole_order() {
    let engine = engine();
    user(&engine, A, 10_000);
    user(&engine, B, 0);
    engine.credit_shares(B, "M", Outcome::Yes, 10).unwrap();

    engine
        .submit_order(&OrderRequest::buy(A, "M", Outcome::Yes, 600, 10))
        .unwrap();
    // Pull the cash backing A's resting bid out from under the book
    engine.ledger().release_cash(A, 6_000).unwrap();

    let books_before = engine.order_books();
    let cash_before = engine.all_cash();
    let positions_before = engine.positions(B).unwrap();

    let err = engine
        .submit_order(&OrderRequest::sell(B, "M", Outcome::Yes, 600, 10))
        .unwrap_err();
    assert!(err.is_internal(), "{}", err);
    assert!(matches!(err, EngineError::InvariantViolation(_)));

    assert_eq!(engine.order_books(), books_before);
    assert_eq!(engine.all_cash(), cash_before);
    assert_eq!(engine.positions(B).unwrap(), positions_before);
    assert_eq!(positions_before[0].locked, 0);
    assert!(engine.audit().is_err());
}

