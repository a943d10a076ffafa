//! Cross-thread dependency manager scenarios.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hevme_sync::{DepMngr, MapState};

#[test]
fn row_row_publish_and_check_scenario() {
    // Producer publishes row 0 through column 5.
    let m = DepMngr::row_row(4);
    m.set(0, 5);

    // offset 2, col 3: 5 + 2 >= 3, ready at once.
    assert!(m.try_check(1, 2, 3));
    // offset 2, col 8 needs column 6.
    assert!(!m.try_check(1, 2, 8));
    m.set(0, 6);
    assert!(m.try_check(1, 2, 8));
}

#[test]
fn blocked_consumer_wakes_when_dependency_publishes() {
    let m = Arc::new(DepMngr::row_row(2));
    m.set(0, 5);

    let woke = Arc::new(AtomicBool::new(false));
    let consumer = {
        let m = Arc::clone(&m);
        let woke = Arc::clone(&woke);
        thread::spawn(move || {
            m.check(1, 2, 8);
            woke.store(true, Ordering::SeqCst);
        })
    };

    thread::sleep(Duration::from_millis(30));
    assert!(!woke.load(Ordering::SeqCst), "consumer ran before its dependency");
    m.set(0, 6);
    consumer.join().unwrap();
    assert!(woke.load(Ordering::SeqCst));
}

#[test]
fn wavefront_of_three_rows_advances_in_order() {
    // Three "rows" of work, each waiting on the previous row's lead of two
    // columns, all driven by separate threads.
    const COLS: i32 = 16;
    let m = Arc::new(DepMngr::row_row(3));
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for row in 0..3usize {
        let m = Arc::clone(&m);
        let order = Arc::clone(&order);
        handles.push(thread::spawn(move || {
            for col in 0..COLS {
                // Top-right dependency: the row above must lead by two.
                m.check(row, -2, col);
                order.lock().push((row, col));
                m.set(row, col + 1);
            }
            // One extra publish so the last columns below can start.
            m.set(row, COLS + 1);
        }));
    }
    for h in handles {
        h.join().unwrap();
    }

    let order = order.lock();
    // Whenever row r worked column c, row r-1 had already worked c + 1
    // (published c + 2).
    for (i, &(row, col)) in order.iter().enumerate() {
        if row == 0 {
            continue;
        }
        let above = order[..i]
            .iter()
            .filter(|&&(r, _)| r == row - 1)
            .map(|&(_, c)| c)
            .max()
            .unwrap_or(-1);
        assert!(above >= col + 1, "row {row} col {col} ran with row above at {above}");
    }
}

#[test]
fn frame_to_frame_ordering() {
    let m = Arc::new(DepMngr::frm_frm());
    let m2 = Arc::clone(&m);
    let consumer = thread::spawn(move || {
        m2.wait_frame_done(2);
    });
    m.set_frame_done();
    thread::sleep(Duration::from_millis(10));
    assert!(!consumer.is_finished());
    m.set_frame_done();
    consumer.join().unwrap();
}

#[test]
fn map_sync_gates_a_search_window() {
    let m = Arc::new(DepMngr::map(8, 8));
    for y in 0..8 {
        for x in 0..8 {
            if (x, y) != (5, 4) {
                m.map_set(x, y, MapState::Complete);
            }
        }
    }
    let m2 = Arc::clone(&m);
    let waiter = thread::spawn(move || {
        // A window centred at (4, 4) with radius 1 covers the missing cell.
        m2.map_check(4, 4, 1, 1, MapState::Complete);
    });
    thread::sleep(Duration::from_millis(20));
    assert!(!waiter.is_finished());
    m.map_set(5, 4, MapState::Complete);
    waiter.join().unwrap();
}
