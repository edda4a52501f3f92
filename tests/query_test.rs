mod common;

use entity_unit_of_work::{Member, PersistenceError, Team, UnitOfWork, UnitOfWorkSession, Value};
use std::sync::Arc;

use common::{cleanup_database, seed_members_and_teams, setup_database};

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
#[serial_test::serial]
async fn test_single_result_cardinality() {
    let (pool, uow) = setup_database().await;
    let seeded = seed_members_and_teams(&uow).await;
    let session = uow.begin().await.expect("Failed to begin transaction");

    // String literal compared against the generated identifier
    let jpql = format!("select m from Member as m where m.id = '{}'", seeded.members[2]);
    let member = session
        .create_query::<Member>(&jpql)
        .expect("Failed to create query")
        .get_single_result()
        .await
        .expect("Exactly one member should match");
    assert_eq!(member.read().username, "username3");

    let none = session
        .create_query::<Member>("select m from Member m where m.username = :name")
        .expect("Failed to create query")
        .set_parameter("name", "nobody")
        .get_single_result()
        .await;
    assert!(matches!(none, Err(PersistenceError::NoResult)));

    let many = session
        .create_query::<Member>("select m from Member m where m.age = 10")
        .expect("Failed to create query")
        .get_single_result()
        .await;
    assert!(matches!(many, Err(PersistenceError::NonUniqueResult(4))));

    // Repeated rows of one instance still count as a unique result
    let team1 = session
        .create_query::<Team>("select t from Team t join t.members m where t.name = 'team1'")
        .expect("Failed to create query")
        .get_single_result()
        .await
        .expect("Joined rows of one team should be unique");
    assert_eq!(team1.read().id, Some(seeded.team1));

    session.commit().await.expect("Failed to commit transaction");
    cleanup_database(&pool).await;
    pool.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
#[serial_test::serial]
async fn test_join_distinct_and_fetch_join() {
    let (pool, uow) = setup_database().await;
    let seeded = seed_members_and_teams(&uow).await;
    let session = uow.begin().await.expect("Failed to begin transaction");

    // One row per matched pair
    let teams = session
        .create_query::<Team>("select t from Team as t join t.members m order by t.id")
        .expect("Failed to create query")
        .get_result_list()
        .await
        .expect("Failed to run join query");
    assert_eq!(teams.len(), 3);
    assert!(Arc::ptr_eq(&teams[0], &teams[1]));
    assert_eq!(teams[0].read().name, "team1");
    assert_eq!(teams[2].read().name, "team2");

    // One row per team
    let distinct = session
        .create_query::<Team>("select distinct t from Team as t join t.members m order by t.id")
        .expect("Failed to create query")
        .get_result_list()
        .await
        .expect("Failed to run distinct query");
    assert_eq!(distinct.len(), 2);

    session.commit().await.expect("Failed to commit transaction");

    // Fetch join initializes the collection in the same query
    let session = uow.begin().await.expect("Failed to begin transaction");
    let fetched = session
        .create_query::<Team>("select distinct t from Team as t join fetch t.members m order by t.id, m.id")
        .expect("Failed to create query")
        .get_result_list()
        .await
        .expect("Failed to run fetch join");
    assert_eq!(fetched.len(), 2);

    // A member inserted afterwards does not appear in the initialized
    // collection; a lazy load would have picked it up.
    let late = Member::new("username5", 10).with_team(&fetched[0].read());
    session.persist(late).await.expect("Failed to persist member");

    let members = session
        .members_of(&fetched[0])
        .await
        .expect("Failed to read members");
    let names: Vec<String> = members.iter().map(|m| m.read().username.clone()).collect();
    assert_eq!(names, vec!["username1".to_string(), "username2".to_string()]);
    let member1 = session
        .find::<Member>(seeded.members[0])
        .await
        .expect("Failed to find member")
        .expect("Member not found");
    assert!(Arc::ptr_eq(&members[0], &member1));
    session.rollback().await.expect("Failed to rollback transaction");

    // Many-to-one fetch join: inner drops members without a team, left keeps them
    let session = uow.begin().await.expect("Failed to begin transaction");
    let inner = session
        .create_query::<Member>("select m from Member as m join fetch m.team")
        .expect("Failed to create query")
        .get_result_list()
        .await
        .expect("Failed to run fetch join");
    assert_eq!(inner.len(), 3);
    let left = session
        .create_query::<Member>("select m from Member as m left join fetch m.team order by m.id")
        .expect("Failed to create query")
        .get_result_list()
        .await
        .expect("Failed to run left fetch join");
    assert_eq!(left.len(), 4);

    let team = session
        .team_of(&left[0])
        .await
        .expect("Failed to navigate to team")
        .expect("Member should have a team");
    let managed_team1 = session
        .find::<Team>(seeded.team1)
        .await
        .expect("Failed to find team")
        .expect("Team not found");
    assert!(Arc::ptr_eq(&team, &managed_team1));
    assert!(session
        .team_of(&left[3])
        .await
        .expect("Failed to navigate to team")
        .is_none());
    session.commit().await.expect("Failed to commit transaction");

    cleanup_database(&pool).await;
    pool.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
#[serial_test::serial]
async fn test_lazy_collection_and_team_assignment() {
    let (pool, uow) = setup_database().await;
    let seeded = seed_members_and_teams(&uow).await;
    let session = uow.begin().await.expect("Failed to begin transaction");

    let team2 = session
        .find::<Team>(seeded.team2)
        .await
        .expect("Failed to find team")
        .expect("Team not found");
    let members = session.members_of(&team2).await.expect("Failed to load members");
    assert_eq!(members.len(), 1);

    let member4 = session
        .find::<Member>(seeded.members[3])
        .await
        .expect("Failed to find member")
        .expect("Member not found");
    session
        .assign_team(&member4, &team2)
        .expect("Failed to assign team");
    let members = session.members_of(&team2).await.expect("Failed to read members");
    assert_eq!(members.len(), 2);
    assert!(members.iter().any(|m| Arc::ptr_eq(m, &member4)));
    session.commit().await.expect("Failed to commit transaction");

    let session = uow.begin().await.expect("Failed to begin transaction");
    let team2 = session
        .find::<Team>(seeded.team2)
        .await
        .expect("Failed to find team")
        .expect("Team not found");
    let members = session.members_of(&team2).await.expect("Failed to load members");
    let names: Vec<String> = members.iter().map(|m| m.read().username.clone()).collect();
    assert_eq!(names, vec!["username3".to_string(), "username4".to_string()]);

    let transient = Arc::new(parking_lot::RwLock::new(Team::new("transient")));
    match session.members_of(&transient).await {
        Err(PersistenceError::NotManaged(_)) => {}
        other => panic!("expected not managed error, got {:?}", other.map(|m| m.len())),
    }
    session.commit().await.expect("Failed to commit transaction");

    cleanup_database(&pool).await;
    pool.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
#[serial_test::serial]
async fn test_pagination() {
    let (pool, uow) = setup_database().await;
    seed_members_and_teams(&uow).await;
    let session = uow.begin().await.expect("Failed to begin transaction");

    let page = session
        .create_query::<Member>("select m from Member as m order by m.id")
        .expect("Failed to create query")
        .set_first_result(1)
        .set_max_results(2)
        .get_result_list()
        .await
        .expect("Failed to run paged query");
    let names: Vec<String> = page.iter().map(|m| m.read().username.clone()).collect();
    assert_eq!(names, vec!["username2".to_string(), "username3".to_string()]);

    let first = session
        .create_query::<Member>("select m from Member as m")
        .expect("Failed to create query")
        .set_first_result(0)
        .set_max_results(1)
        .get_result_list()
        .await
        .expect("Failed to run paged query");
    assert_eq!(first.len(), 1);

    // Distinct over a collection join: the window counts teams, not joined rows
    let teams = session
        .create_query::<Team>("select distinct t from Team t join t.members m order by t.id")
        .expect("Failed to create query")
        .set_max_results(2)
        .get_result_list()
        .await
        .expect("Failed to run paged distinct join");
    let names: Vec<String> = teams.iter().map(|t| t.read().name.clone()).collect();
    assert_eq!(names, vec!["team1".to_string(), "team2".to_string()]);

    let second = session
        .create_query::<Team>("select distinct t from Team t join t.members m order by t.id")
        .expect("Failed to create query")
        .set_first_result(1)
        .set_max_results(1)
        .get_result_list()
        .await
        .expect("Failed to run paged distinct join");
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].read().name, "team2");

    // Collection fetch: the window applies to teams, not joined rows
    let teams = session
        .create_query::<Team>("select distinct t from Team t join fetch t.members order by t.id")
        .expect("Failed to create query")
        .set_max_results(1)
        .get_result_list()
        .await
        .expect("Failed to run paged fetch join");
    assert_eq!(teams.len(), 1);
    assert_eq!(teams[0].read().name, "team1");
    let members = session.members_of(&teams[0]).await.expect("Failed to read members");
    assert_eq!(members.len(), 2);

    session.commit().await.expect("Failed to commit transaction");
    cleanup_database(&pool).await;
    pool.close().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
#[serial_test::serial]
async fn test_projections_and_invalid_queries() {
    let (pool, uow) = setup_database().await;
    let seeded = seed_members_and_teams(&uow).await;
    let session = uow.begin().await.expect("Failed to begin transaction");

    let rows = session
        .create_projection("select m.username, m.age from Member m join m.team t where t.id = :team order by m.username")
        .expect("Failed to create query")
        .set_parameter("team", seeded.team1)
        .get_result_list()
        .await
        .expect("Failed to run projection");
    assert_eq!(
        rows,
        vec![
            vec![Value::Text("username1".into()), Value::Int(10)],
            vec![Value::Text("username2".into()), Value::Int(10)],
        ]
    );

    let ages = session
        .create_projection("select distinct m.age from Member m")
        .expect("Failed to create query")
        .get_result_list()
        .await
        .expect("Failed to run projection");
    assert_eq!(ages, vec![vec![Value::Int(10)]]);

    let unbound = session
        .create_projection("select m.username from Member m where m.age > :age")
        .expect("Failed to create query")
        .get_result_list()
        .await;
    assert!(matches!(unbound, Err(PersistenceError::Query(_))));

    assert!(matches!(
        session.create_query::<Member>("select t from Team t"),
        Err(PersistenceError::Query(_))
    ));
    assert!(matches!(
        session.create_query::<Member>("select m.username from Member m"),
        Err(PersistenceError::Query(_))
    ));
    assert!(matches!(
        session.create_projection("select m from Member m"),
        Err(PersistenceError::Query(_))
    ));
    assert!(matches!(
        session.create_query::<Member>("select m from Member m where m.nickname = 'x'"),
        Err(PersistenceError::Query(_))
    ));

    session.commit().await.expect("Failed to commit transaction");
    cleanup_database(&pool).await;
    pool.close().await;
}
