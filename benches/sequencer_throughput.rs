//! Sequencer Throughput Benchmark
//!
//! Measures the raw claim/publish cost of both sequencers, then the cost of
//! handing bursts of events to a consumer thread through a ring buffer, from
//! one producer and from several, compared against a crossbeam channel of the
//! same capacity.

use criterion::measurement::WallTime;
use criterion::{
    black_box, criterion_group, criterion_main, BenchmarkGroup, BenchmarkId, Criterion, Throughput,
};
use crossbeam::channel::bounded;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ringgate::disruptor::{
    BatchEventProcessor, BusySpinWaitStrategy, ConsumerBarrier, DefaultEventFactory, EventHandler,
    ProducerType, Result, RingBuffer, Sequence, SequenceBarrier, Sequencer,
};

// Benchmark configuration
const BUFFER_SIZE: usize = 128;
const BURST_SIZES: [u64; 3] = [1, 10, 100];
const PRODUCER_TYPES: [ProducerType; 2] = [ProducerType::Single, ProducerType::Multi];
const PRODUCERS: i64 = 3;

/// Event structure for benchmarking
#[derive(Debug, Default, Clone)]
struct Event {
    data: i64,
}

/// Handler that publishes the last value it saw
struct Sink(Arc<AtomicI64>);

impl EventHandler<Event> for Sink {
    fn on_event(&mut self, event: &Event, _sequence: i64, end_of_batch: bool) -> Result<()> {
        if end_of_batch {
            self.0.store(event.data, Ordering::Release);
        }
        Ok(())
    }
}

/// Handler that publishes how many events it has seen
struct Counter {
    seen: i64,
    sink: Arc<AtomicI64>,
}

impl EventHandler<Event> for Counter {
    fn on_event(&mut self, _event: &Event, _sequence: i64, end_of_batch: bool) -> Result<()> {
        self.seen += 1;
        if end_of_batch {
            self.sink.store(self.seen, Ordering::Release);
        }
        Ok(())
    }
}

fn wait_for_sink(sink: &AtomicI64, expected: i64) {
    while sink.load(Ordering::Acquire) != expected {
        std::hint::spin_loop();
    }
}

/// Claim and publish with a consumer that is always caught up
fn claim_publish_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("claim_publish");
    group.throughput(Throughput::Elements(1));

    for producer_type in PRODUCER_TYPES {
        let sequencer = producer_type
            .create_sequencer(BUFFER_SIZE)
            .expect("Failed to create sequencer");
        let consumer = Arc::new(Sequence::default());
        sequencer.add_dependent_barriers(&[consumer.clone() as Arc<dyn SequenceBarrier>]);

        group.bench_function(BenchmarkId::new("next_publish", producer_type), |b| {
            b.iter(|| {
                let sequence = sequencer.next().expect("Failed to claim");
                sequencer.publish(sequence);
                consumer.set(sequence);
                black_box(sequence)
            });
        });

        group.bench_function(BenchmarkId::new("batch_of_16", producer_type), |b| {
            b.iter(|| {
                let hi = sequencer.next_n(16).expect("Failed to claim");
                sequencer.publish_range(hi - 15, hi);
                consumer.set(hi);
                black_box(hi)
            });
        });
    }
    group.finish();
}

fn ring_buffer_handoff(
    group: &mut BenchmarkGroup<WallTime>,
    producer_type: ProducerType,
    burst_size: i64,
) {
    let sequencer = producer_type
        .create_sequencer(BUFFER_SIZE)
        .expect("Failed to create sequencer");
    let ring_buffer = Arc::new(
        RingBuffer::new(BUFFER_SIZE, DefaultEventFactory::<Event>::new())
            .expect("Failed to create ring buffer"),
    );
    let barrier = Arc::new(ConsumerBarrier::new(
        sequencer.clone(),
        Arc::new(BusySpinWaitStrategy::new()),
        Vec::new(),
    ));
    barrier.attach();

    let sink = Arc::new(AtomicI64::new(-1));
    let mut processor =
        BatchEventProcessor::new(ring_buffer.clone(), barrier.clone(), Sink(sink.clone()));
    let consumer = thread::spawn(move || processor.run());

    let mut counter = 0;
    group.bench_function(BenchmarkId::new(format!("ringgate_{producer_type}"), burst_size), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                for _ in 0..burst_size {
                    counter += 1;
                    let data = counter;
                    ring_buffer
                        .publish_event(&*sequencer, |event, _| event.data = data)
                        .expect("Failed to publish");
                }
                wait_for_sink(&sink, counter);
            }
            start.elapsed()
        });
    });

    barrier.alert();
    consumer
        .join()
        .expect("Consumer thread panicked")
        .expect("Consumer failed");
    barrier.detach();
}

fn crossbeam_handoff(group: &mut BenchmarkGroup<WallTime>, burst_size: i64) {
    let (sender, receiver) = bounded::<Event>(BUFFER_SIZE);
    let sink = Arc::new(AtomicI64::new(-1));
    let consumer = {
        let sink = sink.clone();
        thread::spawn(move || {
            while let Ok(event) = receiver.recv() {
                sink.store(event.data, Ordering::Release);
            }
        })
    };

    let mut counter = 0;
    group.bench_function(BenchmarkId::new("crossbeam", burst_size), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                for _ in 0..burst_size {
                    counter += 1;
                    sender
                        .send(Event { data: counter })
                        .expect("Receiver disconnected");
                }
                wait_for_sink(&sink, counter);
            }
            start.elapsed()
        });
    });

    drop(sender);
    consumer.join().expect("Consumer thread panicked");
}

fn ring_buffer_mpsc(group: &mut BenchmarkGroup<WallTime>, burst_size: i64) {
    let sequencer = ProducerType::Multi
        .create_sequencer(BUFFER_SIZE)
        .expect("Failed to create sequencer");
    let ring_buffer = Arc::new(
        RingBuffer::new(BUFFER_SIZE, DefaultEventFactory::<Event>::new())
            .expect("Failed to create ring buffer"),
    );
    let barrier = Arc::new(ConsumerBarrier::new(
        sequencer.clone(),
        Arc::new(BusySpinWaitStrategy::new()),
        Vec::new(),
    ));
    barrier.attach();

    let sink = Arc::new(AtomicI64::new(0));
    let handler = Counter {
        seen: 0,
        sink: sink.clone(),
    };
    let mut processor = BatchEventProcessor::new(ring_buffer.clone(), barrier.clone(), handler);
    let consumer = thread::spawn(move || processor.run());

    let mut expected = 0;
    group.bench_function(BenchmarkId::new("ringgate_mpsc", burst_size), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                thread::scope(|scope| {
                    for producer in 0..PRODUCERS {
                        let ring_buffer = &ring_buffer;
                        let sequencer = &sequencer;
                        scope.spawn(move || {
                            for _ in 0..burst_size {
                                ring_buffer
                                    .publish_event(&**sequencer, |event, _| event.data = producer)
                                    .expect("Failed to publish");
                            }
                        });
                    }
                });
                expected += PRODUCERS * burst_size;
                wait_for_sink(&sink, expected);
            }
            start.elapsed()
        });
    });

    barrier.alert();
    consumer
        .join()
        .expect("Consumer thread panicked")
        .expect("Consumer failed");
    barrier.detach();
}

fn crossbeam_mpsc(group: &mut BenchmarkGroup<WallTime>, burst_size: i64) {
    let (sender, receiver) = bounded::<Event>(BUFFER_SIZE);
    let sink = Arc::new(AtomicI64::new(0));
    let consumer = {
        let sink = sink.clone();
        thread::spawn(move || {
            let mut seen = 0;
            while receiver.recv().is_ok() {
                seen += 1;
                sink.store(seen, Ordering::Release);
            }
        })
    };

    let mut expected = 0;
    group.bench_function(BenchmarkId::new("crossbeam_mpsc", burst_size), |b| {
        b.iter_custom(|iters| {
            let start = Instant::now();
            for _ in 0..iters {
                thread::scope(|scope| {
                    for producer in 0..PRODUCERS {
                        let sender = sender.clone();
                        scope.spawn(move || {
                            for _ in 0..burst_size {
                                sender
                                    .send(Event { data: producer })
                                    .expect("Receiver disconnected");
                            }
                        });
                    }
                });
                expected += PRODUCERS * burst_size;
                wait_for_sink(&sink, expected);
            }
            start.elapsed()
        });
    });

    drop(sender);
    consumer.join().expect("Consumer thread panicked");
}

/// Bursts from several producer threads handed to one consumer thread
fn mpsc_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("mpsc");
    group.measurement_time(Duration::from_secs(5));

    for burst_size in BURST_SIZES {
        group.throughput(Throughput::Elements(burst_size * PRODUCERS as u64));
        crossbeam_mpsc(&mut group, burst_size as i64);
        ring_buffer_mpsc(&mut group, burst_size as i64);
    }
    group.finish();
}

/// Bursts handed to one consumer thread
fn handoff_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("handoff");
    group.measurement_time(Duration::from_secs(5));

    for burst_size in BURST_SIZES {
        group.throughput(Throughput::Elements(burst_size));
        crossbeam_handoff(&mut group, burst_size as i64);
        for producer_type in PRODUCER_TYPES {
            ring_buffer_handoff(&mut group, producer_type, burst_size as i64);
        }
    }
    group.finish();
}

criterion_group!(
    benches,
    claim_publish_benchmark,
    handoff_benchmark,
    mpsc_benchmark
);
criterion_main!(benches);
