use mongodb::{
    error::{TRANSIENT_TRANSACTION_ERROR, UNKNOWN_TRANSACTION_COMMIT_RESULT},
    Client, ClientSession,
};
use rand::Rng;
use rocket::{futures::future::BoxFuture, tokio::time::sleep};
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// Longest pause between two runs of a conflicting transaction.
const MAX_BACKOFF_MILLIS: u64 = 50;

/// Run `body` inside a multi-document transaction and commit it.
///
/// If `body` fails, the transaction is aborted and none of its writes become
/// visible. A transaction that loses a write conflict against a concurrent
/// one (signalled by the `TransientTransactionError` label) had no effect at
/// all, so `body` is run again in a fresh transaction after a short random
/// backoff, for as long as `timeout` has not elapsed since the first run. A
/// commit whose outcome is unknown is re-issued within the same time limit,
/// which the server guarantees to be idempotent.
///
/// `body` may be invoked more than once, so it must not have side effects
/// outside the session.
pub async fn with_transaction<T, F>(client: &Client, timeout: Duration, mut body: F) -> Result<T>
where
    F: for<'s> FnMut(&'s mut ClientSession) -> BoxFuture<'s, Result<T>>,
{
    let started = Instant::now();
    let mut session = client.start_session(None).await?;
    let mut attempt = 1;
    loop {
        session.start_transaction(None).await?;
        let result = match body(&mut session).await {
            Ok(value) => commit(&mut session, started, timeout).await.map(|_| value),
            Err(err) => {
                // The server may already have aborted the transaction, in
                // which case aborting again reports an error we can ignore.
                let _ = session.abort_transaction().await;
                Err(err)
            }
        };

        match result {
            Err(Error::Db(ref err))
                if err.contains_label(TRANSIENT_TRANSACTION_ERROR)
                    && started.elapsed() < timeout =>
            {
                debug!("Transaction conflict on attempt {attempt}, retrying");
                sleep(backoff(attempt)).await;
                attempt += 1;
            }
            Err(Error::Db(err)) if err.contains_label(TRANSIENT_TRANSACTION_ERROR) => {
                warn!("Transaction still conflicting after {attempt} attempts, giving up");
                return Err(Error::Db(err));
            }
            result => return result,
        }
    }
}

/// Randomised delay before retry number `attempt`, growing linearly up to
/// [`MAX_BACKOFF_MILLIS`].
fn backoff(attempt: u32) -> Duration {
    let max_millis = (5 * u64::from(attempt)).min(MAX_BACKOFF_MILLIS);
    Duration::from_millis(rand::thread_rng().gen_range(1..=max_millis))
}

/// Commit the session's transaction, re-issuing the commit while its outcome
/// is unknown and the time limit allows.
async fn commit(session: &mut ClientSession, started: Instant, timeout: Duration) -> Result<()> {
    loop {
        match session.commit_transaction().await {
            Err(err)
                if err.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
                    && started.elapsed() < timeout =>
            {
                debug!("Unknown commit result, re-issuing commit");
            }
            result => return result.map_err(Error::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use mongodb::{bson::doc, Database};
    use rocket::local::asynchronous::Client;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::model::mongodb::{Coll, Counter};

    #[backend_test]
    async fn failed_body_leaves_no_writes(client: Client, db: Database) {
        let mongo = client.rocket().state::<mongodb::Client>().unwrap();
        let counters = Coll::<Counter>::from_db(&db);
        let result: Result<()> = with_transaction(mongo, Duration::from_secs(5), |session| {
            let counters = counters.clone();
            Box::pin(async move {
                let counter = Counter {
                    id: "rolled_back".to_string(),
                    next: 1,
                };
                counters
                    .insert_one_with_session(counter, None, session)
                    .await?;
                Err(Error::BadRequest("abandon".to_string()))
            })
        })
        .await;
        assert!(matches!(result, Err(Error::BadRequest(_))));

        let remaining = counters
            .count_documents(doc! { "_id": "rolled_back" }, None)
            .await
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[backend_test]
    async fn non_transient_errors_are_not_retried(client: Client, db: Database) {
        let mongo = client.rocket().state::<mongodb::Client>().unwrap();
        let counters = Coll::<Counter>::from_db(&db);
        let runs = AtomicU32::new(0);
        let result: Result<u64> = with_transaction(mongo, Duration::from_secs(5), |session| {
            runs.fetch_add(1, Ordering::SeqCst);
            let counters = counters.clone();
            Box::pin(async move {
                let found = counters
                    .find_one_with_session(doc! { "_id": "missing" }, None, session)
                    .await?;
                found
                    .map(|c| c.next)
                    .ok_or_else(|| Error::not_found("Counter 'missing'"))
            })
        })
        .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_grows_then_levels_off() {
        for attempt in 1..100 {
            let delay = backoff(attempt);
            assert!(delay >= Duration::from_millis(1));
            assert!(delay <= Duration::from_millis(5 * u64::from(attempt)));
            assert!(delay <= Duration::from_millis(MAX_BACKOFF_MILLIS));
        }
    }
}
