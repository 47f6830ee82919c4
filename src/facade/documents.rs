use crate::Client;
use crate::core::Result;
use crate::core::error::{expect_one, expect_one_update};
use crate::facade::transactions::TxnScope;
use futures::{FutureExt, TryStreamExt};
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{Bson, Document, doc};
use mongodb::results::{DeleteResult, UpdateResult};
use mongodb::{ClientSession, Collection, Database, IndexModel};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Await a driver action, binding it to the session when there is one
macro_rules! run {
    ($action:expr, $session:expr) => {
        match $session {
            Some(session) => $action.session(session).await,
            None => $action.await,
        }
    };
}

/// Sort, skip and limit for `find_pages`
///
/// A `limit` of 0 means no limit.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub sort: Option<Document>,
    pub skip: u64,
    pub limit: i64,
}

impl Page {
    pub fn new(skip: u64, limit: i64) -> Self {
        Self {
            sort: None,
            skip,
            limit,
        }
    }

    /// Set the sort specification, e.g. `doc! { "uid": -1 }`
    pub fn sort(mut self, sort: Document) -> Self {
        self.sort = Some(sort);
        self
    }
}

/// One operation against the default database, optionally inside a session
pub(crate) struct Target<'a> {
    database: &'a Database,
    session: Option<&'a mut ClientSession>,
}

impl<'a> Target<'a> {
    pub(crate) fn new(database: &'a Database, session: Option<&'a mut ClientSession>) -> Self {
        Self { database, session }
    }

    fn collection<T: Send + Sync>(&self, name: &str) -> Collection<T> {
        self.database.collection(name)
    }

    pub(crate) async fn create_collection(self, name: &str) -> Result<()> {
        run!(self.database.create_collection(name), self.session)?;
        Ok(())
    }

    pub(crate) async fn create_index(self, collection: &str, index: IndexModel) -> Result<String> {
        let coll = self.collection::<Document>(collection);
        let created = run!(coll.create_index(index), self.session)?;
        Ok(created.index_name)
    }

    pub(crate) async fn find_one<T>(self, collection: &str, filter: Document) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send + Sync,
    {
        let coll = self.collection::<T>(collection);
        Ok(run!(coll.find_one(filter), self.session)?)
    }

    pub(crate) async fn find_pages<T>(
        self,
        collection: &str,
        filter: Document,
        page: Page,
    ) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Unpin + Send + Sync,
    {
        let coll = self.collection::<T>(collection);
        let mut find = coll.find(filter).skip(page.skip).limit(page.limit);
        if let Some(sort) = page.sort {
            find = find.sort(sort);
        }

        let documents: Vec<T> = match self.session {
            Some(session) => {
                let mut cursor = find.session(&mut *session).await?;
                cursor.stream(session).try_collect().await?
            }
            None => find.await?.try_collect().await?,
        };
        Ok(documents)
    }

    pub(crate) async fn count(self, collection: &str, filter: Document) -> Result<u64> {
        let coll = self.collection::<Document>(collection);
        Ok(run!(coll.count_documents(filter), self.session)?)
    }

    pub(crate) async fn insert_one<T>(self, collection: &str, document: &T) -> Result<Bson>
    where
        T: Serialize + Send + Sync,
    {
        let coll = self.collection::<T>(collection);
        let inserted = run!(coll.insert_one(document), self.session)?;
        Ok(inserted.inserted_id)
    }

    pub(crate) async fn insert_many<T>(self, collection: &str, documents: &[T]) -> Result<usize>
    where
        T: Serialize + Send + Sync,
    {
        // the driver rejects an empty batch
        if documents.is_empty() {
            return Ok(0);
        }

        let coll = self.collection::<T>(collection);
        let inserted = run!(coll.insert_many(documents.iter()), self.session)?;
        Ok(inserted.inserted_ids.len())
    }

    pub(crate) async fn update_one(
        self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<UpdateResult> {
        let coll = self.collection::<Document>(collection);
        Ok(run!(coll.update_one(filter, update), self.session)?)
    }

    pub(crate) async fn update_many(
        self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<UpdateResult> {
        let coll = self.collection::<Document>(collection);
        Ok(run!(coll.update_many(filter, update), self.session)?)
    }

    pub(crate) async fn delete_one(
        self,
        collection: &str,
        filter: Document,
    ) -> Result<DeleteResult> {
        let coll = self.collection::<Document>(collection);
        Ok(run!(coll.delete_one(filter), self.session)?)
    }

    pub(crate) async fn delete_many(
        self,
        collection: &str,
        filter: Document,
    ) -> Result<DeleteResult> {
        let coll = self.collection::<Document>(collection);
        Ok(run!(coll.delete_many(filter), self.session)?)
    }
}

fn by_id(id: ObjectId) -> Document {
    doc! { "_id": id }
}

// ============================================================================
// Client: operations outside any session
// ============================================================================

impl Client {
    pub(crate) fn target(&self) -> Target<'_> {
        Target::new(self.database(), None)
    }

    /// Create a collection (the database is created with it if needed)
    pub async fn create_collection(&self, name: &str) -> Result<()> {
        self.target().create_collection(name).await
    }

    /// Create one index and return its name
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use mgocli::{Client, IndexModel, bson::doc};
    /// # use mongodb::options::IndexOptions;
    /// # async fn demo(client: &Client) -> mgocli::Result<()> {
    /// let index = IndexModel::builder()
    ///     .keys(doc! { "uid": -1 })
    ///     .options(IndexOptions::builder().unique(true).build())
    ///     .build();
    /// client.create_index("users", index).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn create_index(&self, collection: &str, index: IndexModel) -> Result<String> {
        self.target().create_index(collection, index).await
    }

    /// Find a single document
    ///
    /// Returns `Ok(None)` when nothing matches. Errors are reserved for
    /// failures of the store itself (network, server, decoding).
    pub async fn find_one<T>(&self, collection: &str, filter: Document) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send + Sync,
    {
        self.target().find_one(collection, filter).await
    }

    /// Find all matching documents
    pub async fn find<T>(&self, collection: &str, filter: Document) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Unpin + Send + Sync,
    {
        self.target()
            .find_pages(collection, filter, Page::default())
            .await
    }

    /// Find one page of matching documents
    pub async fn find_pages<T>(
        &self,
        collection: &str,
        filter: Document,
        page: Page,
    ) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Unpin + Send + Sync,
    {
        self.target().find_pages(collection, filter, page).await
    }

    /// Count matching documents
    pub async fn count(&self, collection: &str, filter: Document) -> Result<u64> {
        self.target().count(collection, filter).await
    }

    /// Insert a document and return its `_id`
    pub async fn insert_one<T>(&self, collection: &str, document: &T) -> Result<Bson>
    where
        T: Serialize + Send + Sync,
    {
        self.target().insert_one(collection, document).await
    }

    /// Insert documents and return how many were inserted
    pub async fn insert_many<T>(&self, collection: &str, documents: &[T]) -> Result<usize>
    where
        T: Serialize + Send + Sync,
    {
        self.target().insert_many(collection, documents).await
    }

    pub async fn update_by_id(
        &self,
        collection: &str,
        id: ObjectId,
        update: Document,
    ) -> Result<()> {
        self.target().update_one(collection, by_id(id), update).await?;
        Ok(())
    }

    /// Update by `_id`, failing unless exactly one document was modified
    ///
    /// An update that leaves the document unchanged counts as zero.
    pub async fn must_update_by_id(
        &self,
        collection: &str,
        id: ObjectId,
        update: Document,
    ) -> Result<()> {
        let result = self.target().update_one(collection, by_id(id), update).await?;
        expect_one_update("must_update_by_id", result.matched_count, result.modified_count)
    }

    /// Update every matching document
    pub async fn updates(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<UpdateResult> {
        self.target().update_many(collection, filter, update).await
    }

    /// Update the single document matching `filter`
    ///
    /// Runs in its own transaction: when the filter matches zero or several
    /// documents nothing is written and a cardinality error is returned.
    /// Needs a replica set or sharded cluster.
    pub async fn must_update_one(
        &self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<()> {
        let collection = collection.to_string();
        self.transaction(move |mut txn| {
            let collection = collection.clone();
            let filter = filter.clone();
            let update = update.clone();
            async move { txn.must_update_one(&collection, filter, update).await }.boxed()
        })
        .await
    }

    pub async fn delete_by_id(&self, collection: &str, id: ObjectId) -> Result<()> {
        self.target().delete_one(collection, by_id(id)).await?;
        Ok(())
    }

    /// Delete by `_id`, failing unless exactly one document was deleted
    pub async fn must_delete_by_id(&self, collection: &str, id: ObjectId) -> Result<()> {
        let result = self.target().delete_one(collection, by_id(id)).await?;
        expect_one("must_delete_by_id", result.deleted_count)
    }

    /// Delete every matching document
    pub async fn deletes(&self, collection: &str, filter: Document) -> Result<DeleteResult> {
        self.target().delete_many(collection, filter).await
    }

    /// Delete the single document matching `filter`
    ///
    /// Transactional like [`Client::must_update_one`].
    pub async fn must_delete_one(&self, collection: &str, filter: Document) -> Result<()> {
        let collection = collection.to_string();
        self.transaction(move |mut txn| {
            let collection = collection.clone();
            let filter = filter.clone();
            async move { txn.must_delete_one(&collection, filter).await }.boxed()
        })
        .await
    }
}

// ============================================================================
// TxnScope: the same operations bound to the transaction's session
// ============================================================================

impl TxnScope<'_> {
    pub(crate) fn target(&mut self) -> Target<'_> {
        let (database, session) = self.parts();
        Target::new(database, Some(session))
    }

    pub async fn create_collection(&mut self, name: &str) -> Result<()> {
        self.target().create_collection(name).await
    }

    pub async fn create_index(&mut self, collection: &str, index: IndexModel) -> Result<String> {
        self.target().create_index(collection, index).await
    }

    /// Find a single document, `Ok(None)` when nothing matches
    pub async fn find_one<T>(&mut self, collection: &str, filter: Document) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send + Sync,
    {
        self.target().find_one(collection, filter).await
    }

    pub async fn find<T>(&mut self, collection: &str, filter: Document) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Unpin + Send + Sync,
    {
        self.target()
            .find_pages(collection, filter, Page::default())
            .await
    }

    pub async fn find_pages<T>(
        &mut self,
        collection: &str,
        filter: Document,
        page: Page,
    ) -> Result<Vec<T>>
    where
        T: DeserializeOwned + Unpin + Send + Sync,
    {
        self.target().find_pages(collection, filter, page).await
    }

    pub async fn count(&mut self, collection: &str, filter: Document) -> Result<u64> {
        self.target().count(collection, filter).await
    }

    pub async fn insert_one<T>(&mut self, collection: &str, document: &T) -> Result<Bson>
    where
        T: Serialize + Send + Sync,
    {
        self.target().insert_one(collection, document).await
    }

    pub async fn insert_many<T>(&mut self, collection: &str, documents: &[T]) -> Result<usize>
    where
        T: Serialize + Send + Sync,
    {
        self.target().insert_many(collection, documents).await
    }

    pub async fn update_by_id(
        &mut self,
        collection: &str,
        id: ObjectId,
        update: Document,
    ) -> Result<()> {
        self.target().update_one(collection, by_id(id), update).await?;
        Ok(())
    }

    pub async fn must_update_by_id(
        &mut self,
        collection: &str,
        id: ObjectId,
        update: Document,
    ) -> Result<()> {
        let result = self.target().update_one(collection, by_id(id), update).await?;
        expect_one_update("must_update_by_id", result.matched_count, result.modified_count)
    }

    pub async fn updates(
        &mut self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<UpdateResult> {
        self.target().update_many(collection, filter, update).await
    }

    /// Update every match and fail unless exactly one matched and was
    /// modified. The error aborts the surrounding transaction.
    pub async fn must_update_one(
        &mut self,
        collection: &str,
        filter: Document,
        update: Document,
    ) -> Result<()> {
        let result = self.target().update_many(collection, filter, update).await?;
        expect_one_update("must_update_one", result.matched_count, result.modified_count)
    }

    pub async fn delete_by_id(&mut self, collection: &str, id: ObjectId) -> Result<()> {
        self.target().delete_one(collection, by_id(id)).await?;
        Ok(())
    }

    pub async fn must_delete_by_id(&mut self, collection: &str, id: ObjectId) -> Result<()> {
        let result = self.target().delete_one(collection, by_id(id)).await?;
        expect_one("must_delete_by_id", result.deleted_count)
    }

    pub async fn deletes(&mut self, collection: &str, filter: Document) -> Result<DeleteResult> {
        self.target().delete_many(collection, filter).await
    }

    /// Delete every match and fail unless exactly one was deleted.
    /// The error aborts the surrounding transaction.
    pub async fn must_delete_one(&mut self, collection: &str, filter: Document) -> Result<()> {
        let result = self.target().delete_many(collection, filter).await?;
        expect_one("must_delete_one", result.deleted_count)
    }
}
