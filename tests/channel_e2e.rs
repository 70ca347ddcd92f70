//! End-to-end channel scenarios: producer/consumer draining, rendezvous
//! hand-off, close semantics, and waitlist FIFO ordering.

use corun::test_utils::init_test_logging;
use corun::time::sleep;
use corun::{
    assert_with_log, channel, spawn_on, test_complete, test_phase, ChannelClosed, Executor,
    LoopExecutor,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn looper() -> Arc<dyn Executor> {
    Arc::new(LoopExecutor::new())
}

#[test]
fn producer_and_two_consumers_drain_every_value_once() {
    init_test_logging();
    test_phase!("producer_and_two_consumers_drain_every_value_once");

    let chan = channel::<u32>(2);

    let tx = chan.clone();
    let producer = spawn_on(looper(), async move {
        for value in 0..10 {
            tx.write(value).await.expect("reader side vanished");
            sleep(Duration::from_millis(30)).await;
        }
        tx.close();
    });

    let consume = |chan: corun::Channel<u32>| {
        spawn_on(looper(), async move {
            let mut received = Vec::new();
            let closed = loop {
                match chan.read().await {
                    Ok(value) => received.push(value),
                    Err(ChannelClosed) => break true,
                }
            };
            (received, closed)
        })
    };
    let first = consume(chan.clone());
    let second = consume(chan);

    producer.get_result().unwrap();
    let (got_a, closed_a) = first.get_result().unwrap();
    let (got_b, closed_b) = second.get_result().unwrap();

    assert_with_log!(closed_a, "first consumer saw close", true, closed_a);
    assert_with_log!(closed_b, "second consumer saw close", true, closed_b);

    let mut union: Vec<u32> = got_a.iter().chain(got_b.iter()).copied().collect();
    union.sort_unstable();
    assert_with_log!(
        union == (0..10).collect::<Vec<_>>(),
        "every value received exactly once",
        (0..10).collect::<Vec<_>>(),
        union
    );
    test_complete!("producer_and_two_consumers_drain_every_value_once");
}

#[test]
fn rendezvous_reader_meets_a_later_writer() {
    init_test_logging();
    test_phase!("rendezvous_reader_meets_a_later_writer");

    let chan = channel::<u32>(0);

    let rx = chan.clone();
    let reader = spawn_on(looper(), async move { rx.read().await });

    // Let the reader park before the writer shows up.
    thread::sleep(Duration::from_millis(50));
    let waiting = chan.waiting_readers();
    assert_with_log!(waiting == 1, "reader parked first", 1, waiting);

    let tx = chan.clone();
    let writer = spawn_on(looper(), async move { tx.write(7).await });

    let wrote = writer.get_result().unwrap();
    let read = reader.get_result().unwrap();
    assert_with_log!(wrote == Ok(()), "writer completed", Ok::<(), ChannelClosed>(()), wrote);
    assert_with_log!(read == Ok(7), "reader received 7", Ok::<u32, ChannelClosed>(7), read);
    test_complete!("rendezvous_reader_meets_a_later_writer");
}

#[test]
fn close_while_parked_surfaces_channel_closed() {
    init_test_logging();
    test_phase!("close_while_parked_surfaces_channel_closed");

    let chan = channel::<u32>(0);

    let rx = chan.clone();
    let reader = spawn_on(looper(), async move { rx.read().await });

    thread::sleep(Duration::from_millis(50));
    chan.close();

    let read = reader.get_result().unwrap();
    assert_with_log!(
        read == Err(ChannelClosed),
        "parked reader resumed with the closed failure",
        Err::<u32, ChannelClosed>(ChannelClosed),
        read
    );
    test_complete!("close_while_parked_surfaces_channel_closed");
}

#[test]
fn parked_writers_match_readers_in_fifo_order() {
    init_test_logging();
    test_phase!("parked_writers_match_readers_in_fifo_order");

    let chan = channel::<u32>(0);

    let tx = chan.clone();
    let first_writer = spawn_on(looper(), async move { tx.write(1).await });
    thread::sleep(Duration::from_millis(50));
    let tx = chan.clone();
    let second_writer = spawn_on(looper(), async move { tx.write(2).await });
    thread::sleep(Duration::from_millis(50));

    let waiting = chan.waiting_writers();
    assert_with_log!(waiting == 2, "both writers parked", 2, waiting);

    let rx = chan.clone();
    let reader = spawn_on(looper(), async move {
        let first = rx.read().await.unwrap();
        let second = rx.read().await.unwrap();
        vec![first, second]
    });

    let received = reader.get_result().unwrap();
    assert_with_log!(
        received == vec![1, 2],
        "oldest writer matched first",
        vec![1, 2],
        received
    );
    assert_eq!(first_writer.get_result().unwrap(), Ok(()));
    assert_eq!(second_writer.get_result().unwrap(), Ok(()));
    test_complete!("parked_writers_match_readers_in_fifo_order");
}

#[test]
fn buffered_values_outrank_a_parked_writer() {
    init_test_logging();
    test_phase!("buffered_values_outrank_a_parked_writer");

    let chan = channel::<u32>(2);
    chan.try_write(10).unwrap();
    chan.try_write(20).unwrap();

    let tx = chan.clone();
    let writer = spawn_on(looper(), async move { tx.write(30).await });
    thread::sleep(Duration::from_millis(50));
    let waiting = chan.waiting_writers();
    assert_with_log!(waiting == 1, "writer parked on the full buffer", 1, waiting);

    let rx = chan.clone();
    let reader = spawn_on(looper(), async move {
        let mut values = Vec::new();
        for _ in 0..3 {
            values.push(rx.read().await.unwrap());
        }
        values
    });

    let received = reader.get_result().unwrap();
    assert_with_log!(
        received == vec![10, 20, 30],
        "oldest buffered value first, parked value at the tail",
        vec![10, 20, 30],
        received
    );
    assert_eq!(writer.get_result().unwrap(), Ok(()));
    test_complete!("buffered_values_outrank_a_parked_writer");
}

#[test]
fn writes_to_a_closed_channel_fail_at_resume() {
    init_test_logging();
    test_phase!("writes_to_a_closed_channel_fail_at_resume");

    let chan = channel::<u32>(4);
    chan.close();

    let tx = chan.clone();
    let writer = spawn_on(looper(), async move { tx.write(1).await });
    let wrote = writer.get_result().unwrap();
    assert_with_log!(
        wrote == Err(ChannelClosed),
        "write on a closed channel fails",
        Err::<(), ChannelClosed>(ChannelClosed),
        wrote
    );
    test_complete!("writes_to_a_closed_channel_fail_at_resume");
}
