//! Shared fixtures for the `PostgreSQL` task store tests.

pub use super::cluster::{PostgresCluster, ScratchDatabase, postgres_cluster};
use super::cluster::BoxError;
use chrono::{DateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use eyre::eyre;
use hueforge::generation::{
    adapters::postgres::{GenerationPgPool, PostgresTaskStore},
    domain::{
        Concept, ConceptBatch, ConceptParams, GenerationParams, HexColor, ImageRef, OwnerId,
        PaletteSpec, Task, TaskPayload, Variation,
    },
    ports::{ClaimConstraints, ClaimOutcome, TaskStore},
};
use mockable::DefaultClock;
use rstest::fixture;

/// Schema every scratch database starts from.
const CREATE_GENERATION_TABLES_SQL: &str =
    include_str!("../../migrations/2026-01-01-000000_create_generation_tables/up.sql");

/// Template database holding the migrated schema.
pub const TEMPLATE_DB: &str = "hueforge_test_template";

/// Store backed by its own scratch database.
pub struct StoreContext {
    /// Store under test.
    pub store: PostgresTaskStore,
    /// Keeps the database alive for the test.
    pub database: ScratchDatabase,
}

impl StoreContext {
    /// Opens a direct connection for assertions the port does not expose.
    ///
    /// # Errors
    ///
    /// Returns the connection failure.
    pub fn connect(&self) -> eyre::Result<PgConnection> {
        Ok(PgConnection::establish(&self.database.url())?)
    }

    /// Counts rows in `concepts` for `task`.
    ///
    /// # Errors
    ///
    /// Returns the query failure.
    pub fn concept_rows_for(&self, task: &Task) -> eyre::Result<i64> {
        #[derive(QueryableByName)]
        struct Count {
            #[diesel(sql_type = diesel::sql_types::BigInt)]
            total: i64,
        }

        let mut connection = self.connect()?;
        let row = diesel::sql_query("SELECT COUNT(*) AS total FROM concepts WHERE task_id = $1")
            .bind::<diesel::sql_types::Uuid, _>(task.id().into_inner())
            .get_result::<Count>(&mut connection)?;
        Ok(row.total)
    }

    /// Rewrites both timestamps of `task` to `at`.
    ///
    /// # Errors
    ///
    /// Returns the update failure.
    pub fn backdate(&self, task: &Task, at: DateTime<Utc>) -> eyre::Result<()> {
        let mut connection = self.connect()?;
        diesel::sql_query(
            "UPDATE generation_tasks SET created_at = $2, updated_at = $2 WHERE id = $1",
        )
        .bind::<diesel::sql_types::Uuid, _>(task.id().into_inner())
        .bind::<diesel::sql_types::Timestamptz, _>(at)
        .execute(&mut connection)?;
        Ok(())
    }
}

fn migrate(url: &str) -> Result<(), BoxError> {
    let mut connection = PgConnection::establish(url)?;
    connection.batch_execute(CREATE_GENERATION_TABLES_SQL)?;
    Ok(())
}

/// Store over a freshly migrated scratch database.
///
/// The pool holds several connections so concurrent calls really race in
/// the database rather than queueing on one connection.
#[fixture]
pub async fn store_context(postgres_cluster: PostgresCluster) -> eyre::Result<StoreContext> {
    let cluster = postgres_cluster;
    let database = tokio::task::spawn_blocking(move || {
        cluster.ensure_template(TEMPLATE_DB, migrate)?;
        cluster.scratch_database(TEMPLATE_DB)
    })
    .await?
    .map_err(|err| eyre!(err))?;
    let manager = ConnectionManager::<PgConnection>::new(database.url());
    let pool: GenerationPgPool =
        tokio::task::spawn_blocking(move || Pool::builder().max_size(4).build(manager)).await??;
    Ok(StoreContext {
        store: PostgresTaskStore::new(pool),
        database,
    })
}

/// Inserts a pending generation task for a fresh owner.
///
/// # Errors
///
/// Returns the validation or insert failure.
pub async fn insert_pending(store: &PostgresTaskStore) -> eyre::Result<Task> {
    let params = GenerationParams::new("heron over a lake", "dawn mist")?;
    let task = Task::new(OwnerId::new(), TaskPayload::ConceptGeneration(params), &DefaultClock)?;
    store.insert(&task).await?;
    Ok(task)
}

/// Inserts a pending task and claims it.
///
/// # Errors
///
/// Returns the insert or claim failure, or an error when the claim loses.
pub async fn insert_processing(store: &PostgresTaskStore) -> eyre::Result<Task> {
    let task = insert_pending(store).await?;
    match store.claim(task.id(), ClaimConstraints::none(), Utc::now()).await? {
        ClaimOutcome::Claimed(claimed) => Ok(claimed),
        ClaimOutcome::NotPending => Err(eyre!("freshly inserted task was not claimable")),
    }
}

/// Concept batch for `task` with `variations` single-colour variations.
///
/// # Errors
///
/// Returns the domain validation failure.
pub fn batch_for(task: &Task, variations: usize) -> eyre::Result<ConceptBatch> {
    let owner = task.owner_id();
    let concept = Concept::new(
        ConceptParams {
            owner_id: owner,
            task_id: task.id(),
            logo_description: task.payload().logo_description().to_owned(),
            theme_description: task.payload().theme_description().to_owned(),
            base_image: ImageRef::new(
                format!("{owner}/concepts/{}/base.png", task.id()),
                "https://objects.test/base.png",
                None,
            ),
        },
        &DefaultClock,
    );
    let renders = (1..=variations)
        .map(|index| -> eyre::Result<Variation> {
            let palette = PaletteSpec::new(
                format!("palette-{index}"),
                vec![HexColor::parse("#1f6f8b")?],
                "harbour blues",
            )?;
            let image = ImageRef::new(
                format!("{owner}/variations/{}/{index}.png", concept.id()),
                format!("https://objects.test/{index}.png"),
                None,
            );
            Ok(Variation::new(concept.id(), palette, image, Utc::now()))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ConceptBatch::new(concept, renders))
}
