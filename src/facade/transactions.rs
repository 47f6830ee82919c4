use crate::Client;
use crate::core::{DbError, Result, TxnPhase};
use futures::FutureExt;
use futures::future::BoxFuture;
use log::{debug, warn};
use mongodb::options::{
    Acknowledgment, ReadConcern, ReadPreference, SelectionCriteria, TransactionOptions,
    WriteConcern,
};
use mongodb::{ClientSession, Database};

/// Write concern, read concern and read preference of a transaction
///
/// The default is majority/majority/primary: every read sees majority
/// committed data and the commit waits for a majority of the replica set.
#[derive(Debug, Clone)]
pub struct TxnOptions {
    pub write_concern: WriteConcern,
    pub read_concern: ReadConcern,
    pub read_preference: ReadPreference,
}

impl Default for TxnOptions {
    fn default() -> Self {
        Self {
            write_concern: acknowledged_by(Acknowledgment::Majority),
            read_concern: ReadConcern::majority(),
            read_preference: ReadPreference::Primary,
        }
    }
}

impl TxnOptions {
    pub fn write_concern(mut self, write_concern: WriteConcern) -> Self {
        self.write_concern = write_concern;
        self
    }

    pub fn read_concern(mut self, read_concern: ReadConcern) -> Self {
        self.read_concern = read_concern;
        self
    }

    pub fn read_preference(mut self, read_preference: ReadPreference) -> Self {
        self.read_preference = read_preference;
        self
    }

    pub(crate) fn to_driver(&self) -> TransactionOptions {
        let mut options = TransactionOptions::default();
        options.write_concern = Some(self.write_concern.clone());
        options.read_concern = Some(self.read_concern.clone());
        options.selection_criteria = Some(SelectionCriteria::ReadPreference(
            self.read_preference.clone(),
        ));
        options
    }
}

fn acknowledged_by(w: Acknowledgment) -> WriteConcern {
    let mut write_concern = WriteConcern::default();
    write_concern.w = Some(w);
    write_concern
}

/// Handle passed to a unit of work
///
/// Every operation issued through it runs inside the transaction's session.
pub struct TxnScope<'s> {
    session: &'s mut ClientSession,
    database: &'s Database,
}

impl<'s> TxnScope<'s> {
    fn new(session: &'s mut ClientSession, database: &'s Database) -> Self {
        Self { session, database }
    }

    /// Raw driver session, for driver calls this crate does not wrap
    pub fn session(&mut self) -> &mut ClientSession {
        self.session
    }

    pub fn database(&self) -> &Database {
        self.database
    }

    pub(crate) fn parts(&mut self) -> (&Database, &mut ClientSession) {
        (self.database, &mut *self.session)
    }
}

/// Context threaded through the driver's retry loop
struct TxnState<F> {
    database: Database,
    callback: F,
    attempts: u32,
    callback_ok: bool,
}

impl Client {
    /// Run a unit of work in a transaction
    ///
    /// A session is started, a transaction is opened with the client's
    /// [`TxnOptions`], and `callback` runs with a [`TxnScope`] bound to it.
    /// The transaction commits when the callback returns `Ok` and aborts
    /// otherwise. The callback's value is discarded.
    ///
    /// The driver calls `callback` again when the server reports a transient
    /// transaction error, so the callback must not depend on side effects of
    /// an earlier attempt. Clone owned inputs inside the closure.
    ///
    /// The session is ended exactly once on every path, including when the
    /// returned future is dropped or `transaction_timeout` expires.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use mgocli::{Client, bson::doc};
    /// use futures::FutureExt;
    ///
    /// # async fn demo(client: &Client) -> mgocli::Result<()> {
    /// client
    ///     .transaction(|mut txn| {
    ///         async move {
    ///             txn.insert_one("accounts", &doc! { "owner": "alice", "balance": 10 }).await?;
    ///             txn.must_update_one(
    ///                 "accounts",
    ///                 doc! { "owner": "bob" },
    ///                 doc! { "$inc": { "balance": -10 } },
    ///             )
    ///             .await
    ///         }
    ///         .boxed()
    ///     })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn transaction<F, R>(&self, callback: F) -> Result<()>
    where
        F: for<'s> FnMut(TxnScope<'s>) -> BoxFuture<'s, Result<R>> + Send,
        R: Send,
    {
        let options = self.config().transaction_options.clone();
        self.transaction_with(options, callback).await
    }

    /// Run a unit of work in a transaction with explicit options
    pub async fn transaction_with<F, R>(&self, options: TxnOptions, callback: F) -> Result<()>
    where
        F: for<'s> FnMut(TxnScope<'s>) -> BoxFuture<'s, Result<R>> + Send,
        R: Send,
    {
        let run = self.run_transaction(options, callback);

        match self.config().transaction_timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!("transaction timed out after {:?}, session released", limit);
                    Err(DbError::Timeout {
                        operation: "transaction",
                        after: limit,
                    })
                }
            },
            None => run.await,
        }
    }

    async fn run_transaction<F, R>(&self, options: TxnOptions, callback: F) -> Result<()>
    where
        F: for<'s> FnMut(TxnScope<'s>) -> BoxFuture<'s, Result<R>> + Send,
        R: Send,
    {
        let mut guard = self
            .sessions()
            .start(self.driver())
            .await
            .map_err(|err| DbError::transaction(TxnPhase::Session, err))?;

        let mut state = TxnState {
            database: self.database().clone(),
            callback,
            attempts: 0,
            callback_ok: false,
        };

        let outcome = guard
            .session()
            .start_transaction()
            .with_options(options.to_driver())
            .and_run(&mut state, |session, state| {
                let TxnState {
                    database,
                    callback,
                    attempts,
                    callback_ok,
                } = &mut **state;

                *attempts += 1;
                *callback_ok = false;
                if *attempts > 1 {
                    debug!("retrying transaction, attempt {}", attempts);
                }

                let work = callback(TxnScope::new(session, database));
                async move {
                    let value = work.await.map_err(DbError::into_driver)?;
                    *callback_ok = true;
                    Ok(value)
                }
                .boxed()
            })
            .await;

        guard.end();

        match outcome {
            Ok(_) => {
                debug!("transaction committed after {} attempt(s)", state.attempts);
                Ok(())
            }
            Err(err) => {
                let phase = failed_phase(state.attempts, state.callback_ok);
                let err = DbError::from_driver(err);
                warn!("transaction aborted at {}: {}", phase, err);
                Err(DbError::transaction(phase, err))
            }
        }
    }
}

/// Where a failed `with_transaction` run stopped. No callback attempt means
/// the driver failed before the unit of work ran.
fn failed_phase(attempts: u32, callback_ok: bool) -> TxnPhase {
    if attempts == 0 {
        TxnPhase::Session
    } else if callback_ok {
        TxnPhase::Commit
    } else {
        TxnPhase::Callback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::options::ReadConcernLevel;

    #[test]
    fn test_default_options_are_conservative() {
        let options = TxnOptions::default().to_driver();

        assert!(matches!(
            options.write_concern.and_then(|wc| wc.w),
            Some(Acknowledgment::Majority)
        ));
        assert!(matches!(
            options.read_concern.map(|rc| rc.level),
            Some(ReadConcernLevel::Majority)
        ));
        assert!(matches!(
            options.selection_criteria,
            Some(SelectionCriteria::ReadPreference(ReadPreference::Primary))
        ));
    }

    #[test]
    fn test_options_override() {
        let options = TxnOptions::default()
            .read_concern(ReadConcern::snapshot())
            .write_concern(acknowledged_by(Acknowledgment::Nodes(1)))
            .to_driver();

        assert!(matches!(
            options.read_concern.map(|rc| rc.level),
            Some(ReadConcernLevel::Snapshot)
        ));
        assert!(matches!(
            options.write_concern.and_then(|wc| wc.w),
            Some(Acknowledgment::Nodes(1))
        ));
    }

    #[test]
    fn test_failed_phase() {
        assert_eq!(failed_phase(0, false), TxnPhase::Session);
        assert_eq!(failed_phase(1, false), TxnPhase::Callback);
        assert_eq!(failed_phase(1, true), TxnPhase::Commit);
        // a retried attempt decides the phase, not the first one
        assert_eq!(failed_phase(3, false), TxnPhase::Callback);
        assert_eq!(failed_phase(3, true), TxnPhase::Commit);
    }
}
