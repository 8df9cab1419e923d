//! Pool dispatch over in-process brokers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tasq_remote::{
    BrokerConnection, Job, JobResult, MemoryBroker, TasqClient, TasqClientPool, TasqError,
};

const WAIT: Duration = Duration::from_secs(2);

fn brokers(n: usize) -> Vec<Arc<MemoryBroker>> {
    (0..n)
        .map(|i| Arc::new(MemoryBroker::new(format!("node-{i}"))))
        .collect()
}

fn pool_over(brokers: &[Arc<MemoryBroker>]) -> TasqClientPool {
    let clients = brokers
        .iter()
        .map(|b| TasqClient::new(b.clone()).with_recv_backoff(Duration::from_millis(5)))
        .collect();
    TasqClientPool::new(clients).unwrap()
}

async fn wait_for_sends(broker: &MemoryBroker, count: usize) {
    tokio::time::timeout(WAIT, async {
        while broker.sent_jobs().await.len() < count {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("jobs never reached the broker");
}

#[tokio::test]
async fn schedule_rotates_over_clients() {
    let brokers = brokers(3);
    let pool = pool_over(&brokers);

    let mut futures = Vec::new();
    for i in 0..6 {
        let job = Job::builder("echo").arg(i).name(format!("job-{i}")).build();
        futures.push(pool.schedule(job).await.unwrap());
    }

    for (i, broker) in brokers.iter().enumerate() {
        wait_for_sends(broker, 2).await;
        let names: Vec<String> = broker
            .sent_jobs()
            .await
            .iter()
            .map(|j| j.name().to_string())
            .collect();
        assert_eq!(names, vec![format!("job-{i}"), format!("job-{}", i + 3)]);
    }

    brokers[1].deliver(JobResult::success("job-4", 4, Duration::ZERO));
    assert_eq!(futures[4].value(Some(WAIT)).await, Some(Ok(json!(4))));
    assert_eq!(pool.results().await.len(), 6);

    pool.shutdown().await;
}

#[tokio::test]
async fn blocking_schedule_through_the_pool() {
    let brokers = brokers(1);
    let pool = pool_over(&brokers);

    let feeder = {
        let broker = Arc::clone(&brokers[0]);
        tokio::spawn(async move {
            wait_for_sends(&broker, 1).await;
            let job = broker.sent_jobs().await.remove(0);
            broker.deliver(JobResult::success(job.name(), "done", Duration::ZERO));
        })
    };

    let res = pool
        .schedule_blocking(Job::builder("work").build(), WAIT)
        .await
        .unwrap();
    assert_eq!(res.value, Some(json!("done")));
    feeder.await.unwrap();

    pool.shutdown().await;
}

#[tokio::test]
async fn pool_surfaces_duplicate_names() {
    let brokers = brokers(1);
    let pool = pool_over(&brokers);

    pool.schedule(Job::builder("f").name("dup").build()).await.unwrap();
    let err = pool
        .schedule_blocking(Job::builder("g").name("dup").build(), WAIT)
        .await
        .unwrap_err();
    assert!(matches!(err, TasqError::DuplicateName(n) if n == "dup"));
    assert_eq!(brokers[0].sent_jobs().await.len(), 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn pool_surfaces_send_failures() {
    let brokers = brokers(1);
    let pool = pool_over(&brokers);
    pool.clients()[0].connect().await.unwrap();
    brokers[0].disconnect().await.unwrap();

    let err = pool
        .schedule_blocking(Job::builder("f").name("lost").build(), WAIT)
        .await
        .unwrap_err();
    assert!(matches!(err, TasqError::SendFailed(_)));
    assert!(pool.results().await.is_empty());

    pool.shutdown().await;
}

#[tokio::test]
async fn map_spreads_calls_round_robin() {
    let brokers = brokers(2);
    let pool = pool_over(&brokers);

    let calls = (0..5).map(|i| (vec![json!(i)], BTreeMap::<String, Value>::new()));
    let futures = pool.map("square", calls).await.unwrap();
    assert_eq!(futures.len(), 5);
    assert!(futures.iter().all(Option::is_some));

    let first: Vec<Value> = brokers[0]
        .sent_jobs()
        .await
        .iter()
        .map(|j| j.args()[0].clone())
        .collect();
    let second: Vec<Value> = brokers[1]
        .sent_jobs()
        .await
        .iter()
        .map(|j| j.args()[0].clone())
        .collect();
    assert_eq!(first, vec![json!(0), json!(2), json!(4)]);
    assert_eq!(second, vec![json!(1), json!(3)]);
    assert!(pool.clients().iter().all(|c| c.label().starts_with("memory://")));

    pool.shutdown().await;
}

#[tokio::test]
async fn unreachable_client_buffers_mapped_jobs() {
    let brokers = brokers(2);
    brokers[1].set_unreachable(true);
    let pool = pool_over(&brokers);

    let calls = (0..2).map(|i| (vec![json!(i)], BTreeMap::<String, Value>::new()));
    let futures = pool.map("f", calls).await.unwrap();
    assert!(futures[0].is_some());
    assert!(futures[1].is_none());
    assert_eq!(pool.clients()[1].pending_jobs().await.len(), 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_every_client() {
    let brokers = brokers(2);
    let pool = pool_over(&brokers);
    pool.schedule(Job::builder("f").build()).await.unwrap();
    wait_for_sends(&brokers[0], 1).await;

    pool.shutdown().await;
    for client in pool.clients() {
        assert!(!client.is_connected().await);
    }
    assert!(pool.schedule(Job::builder("late").build()).await.is_err());
}
