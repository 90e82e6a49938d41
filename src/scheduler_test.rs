use super::*;
use std::sync::atomic::AtomicUsize;

fn counter() -> (Arc<AtomicUsize>, impl FnMut() -> std::future::Ready<()> + Send + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    let job = move || {
        c.fetch_add(1, Ordering::SeqCst);
        std::future::ready(())
    };
    (count, job)
}

#[tokio::test(start_paused = true)]
async fn every_waits_one_period_before_first_run() {
    let scheduler = Scheduler::new();
    let (count, job) = counter();
    scheduler.every("test", Duration::from_secs(3), job);

    tokio::time::sleep(Duration::from_millis(2_900)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn every_now_runs_immediately() {
    let scheduler = Scheduler::new();
    let (count, job) = counter();
    scheduler.every_now("test", Duration::from_secs(3), job);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn after_fires_once() {
    let scheduler = Scheduler::new();
    let count = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&count);
    scheduler.after("once", Duration::from_secs(5), move || async move {
        c.fetch_add(1, Ordering::SeqCst);
    });

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(scheduler.active(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancel_stops_a_single_job() {
    let scheduler = Scheduler::new();
    let (count, job) = counter();
    let ticket = scheduler.every("test", Duration::from_secs(1), job);
    let (other, other_job) = counter();
    scheduler.every("other", Duration::from_secs(1), other_job);

    tokio::time::sleep(Duration::from_millis(1_500)).await;
    assert!(scheduler.cancel(ticket));
    assert!(!scheduler.cancel(ticket));

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(other.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn cancel_all_leaves_no_running_timers() {
    let scheduler = Scheduler::new();
    let (count, job) = counter();
    scheduler.every("a", Duration::from_secs(1), job);
    scheduler.after("b", Duration::from_secs(5), || async {});
    assert_eq!(scheduler.active(), 2);

    scheduler.cancel_all();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(scheduler.active(), 0);
    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn dropping_scheduler_aborts_jobs() {
    let (count, job) = counter();
    {
        let scheduler = Scheduler::new();
        scheduler.every("a", Duration::from_secs(1), job);
    }
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
}
