//! End-to-end round trip over real ZeroMQ sockets on loopback.
//!
//! A fake supervisor binds PULL on `port` (jobs) and PUSH on `port + 1`
//! (results) and squares the first argument of every job it receives.

use std::time::Duration;

use serde_json::json;
use tasq_remote::message::{decode_job, encode_result};
use tasq_remote::{Job, JobResult, TasqClient, TasqError};
use tokio::task::JoinHandle;
use zeromq::{PullSocket, PushSocket, Socket, SocketRecv, SocketSend};

const WAIT: Duration = Duration::from_secs(5);

async fn fake_supervisor(port: u16) -> JoinHandle<()> {
    let mut jobs = PullSocket::new();
    jobs.bind(&format!("tcp://127.0.0.1:{port}")).await.unwrap();
    let mut results = PushSocket::new();
    results
        .bind(&format!("tcp://127.0.0.1:{}", port + 1))
        .await
        .unwrap();

    tokio::spawn(async move {
        loop {
            let Ok(raw) = jobs.recv().await else { break };
            let frame = raw.get(0).unwrap();
            let job = decode_job(frame.as_ref()).unwrap();
            let result = match job.args().first().and_then(|v| v.as_i64()) {
                Some(n) => JobResult::success(job.name(), n * n, Duration::from_millis(1)),
                None => {
                    JobResult::failed(job.name(), "TypeError: expected a number", Duration::ZERO)
                }
            };
            let bytes = encode_result(&result).unwrap();
            // The result peer may still be registering right after connect.
            for _ in 0..50 {
                if results.send(bytes.clone().into()).await.is_ok() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        }
    })
}

#[tokio::test]
async fn jobs_round_trip_through_a_supervisor() {
    let port = 17110;
    let supervisor = fake_supervisor(port).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = TasqClient::from_url(&format!("tcp://127.0.0.1:{port}")).unwrap();
    client.connect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let fut = client
        .schedule(Job::builder("square").arg(7).name("seven").build())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fut.value(Some(WAIT)).await, Some(Ok(json!(49))));

    let res = client
        .schedule_blocking(Job::builder("square").arg("x").build(), WAIT)
        .await
        .unwrap();
    assert!(!res.is_success());
    assert!(res.exc.unwrap().starts_with("TypeError"));

    client.close().await.unwrap();
    supervisor.abort();
}

#[tokio::test]
async fn buffered_jobs_flush_to_a_supervisor() {
    let port = 17120;
    let supervisor = fake_supervisor(port).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = TasqClient::from_url(&format!("zmq://127.0.0.1:{port}")).unwrap();
    for i in 1..=3 {
        let buffered = client
            .schedule(Job::builder("square").arg(i).name(format!("b{i}")).build())
            .await
            .unwrap();
        assert!(buffered.is_none());
    }
    client.connect().await.unwrap();

    let results = client.results().await;
    for i in 1..=3i64 {
        let fut = results.get(&format!("b{i}")).unwrap();
        assert_eq!(fut.value(Some(WAIT)).await, Some(Ok(json!(i * i))));
    }

    client.close().await.unwrap();
    supervisor.abort();
}

#[tokio::test]
async fn unreachable_supervisor_times_out_connect() {
    let client = TasqClient::from_config(&tasq_core::ClientConfig {
        url: "tcp://127.0.0.1:17130".into(),
        connect_timeout_ms: 100,
        ..Default::default()
    })
    .unwrap();

    let err = client.connect().await.unwrap_err();
    assert!(
        matches!(err, TasqError::Timeout(_) | TasqError::Transport(_)),
        "unexpected error: {err}"
    );
    assert!(!client.is_connected().await);
}
