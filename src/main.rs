use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use entity_unit_of_work::{
    Member, PersistenceConfig, PersistenceResult, PostgresUnitOfWork, PostgresUnitOfWorkSession,
    Team,
};

/// Seed a few teams and members, then run an entity query against them.
#[derive(Debug, Parser)]
#[command(name = "entity-demo", version)]
struct Cli {
    /// Persistence configuration file
    #[arg(long, default_value = "persistence.toml")]
    config: String,

    /// Persistence unit to open
    #[arg(long, default_value = "hello")]
    unit: String,

    /// Team query to run after seeding
    #[arg(long, default_value = "select t from Team as t join t.members m")]
    query: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = PersistenceConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config))?;
    let unit = config.unit(&cli.unit)?.with_env_overrides();
    let uow = PostgresUnitOfWork::connect(&unit)
        .await
        .with_context(|| format!("opening persistence unit '{}'", unit.name))?;

    let query = cli.query.clone();
    let outcome = uow
        .transactional(|session| async move { seed_and_report(&session, &query).await })
        .await;

    uow.close().await?;
    outcome?;
    Ok(())
}

async fn seed_and_report(session: &PostgresUnitOfWorkSession, query: &str) -> PersistenceResult<()> {
    let team1 = session.persist(Team::new("team1")).await?;
    let team2 = session.persist(Team::new("team2")).await?;

    let member1 = session.persist(Member::new("username1", 10)).await?;
    session.assign_team(&member1, &team1)?;
    let member2 = session.persist(Member::new("username2", 10)).await?;
    session.assign_team(&member2, &team1)?;
    let member3 = session.persist(Member::new("username3", 10)).await?;
    session.assign_team(&member3, &team2)?;
    session.persist(Member::new("username4", 10)).await?;

    session.flush().await?;
    session.clear();

    let teams = session.create_query::<Team>(query)?.get_result_list().await?;
    for team in &teams {
        let members = session.members_of(team).await?;
        println!("team = {} | members = {}", team.read().name, members.len());
        for member in &members {
            println!("-> member = {}", member.read());
        }
    }
    Ok(())
}
