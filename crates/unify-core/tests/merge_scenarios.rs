use unify_core::{
    group, open_in_memory, validate, AppConfig, CandidateRepository, ConnectionPool,
    EntityConfig, MergeAction, MergeDecision, MergeExecutor, RecordId, SqliteCandidateRepository,
    Unifier, UnifyError, ValidationError,
};

fn seeded_pool() -> ConnectionPool {
    let pool = open_in_memory().unwrap();
    pool.get_connection()
        .execute_batch(
            "
            CREATE TABLE companies (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
            CREATE TABLE vehicles (
                id INTEGER PRIMARY KEY,
                plate TEXT NOT NULL,
                company_id INTEGER REFERENCES companies(id)
            );
            CREATE TABLE weigh_events (
                id INTEGER PRIMARY KEY,
                company_id INTEGER REFERENCES companies(id),
                location_id INTEGER,
                net_kg REAL
            );
            INSERT INTO companies (id, name) VALUES
                (1, 'ABC Waste Ltd'), (2, 'ABC Waste'), (3, 'XYZ Corp');
            INSERT INTO vehicles (plate, company_id) VALUES
                ('KAA 100A', 1), ('KBB 200B', 2), ('KCC 300C', 3);
            INSERT INTO weigh_events (company_id, net_kg) VALUES
                (2, 1200.0), (2, 800.5), (3, 40.0);
            ",
        )
        .unwrap();
    pool
}

fn companies() -> EntityConfig {
    EntityConfig::new("companies")
        .with_dependent("vehicles", "company_id")
        .with_dependent("weigh_events", "company_id")
}

fn merge(group_id: u32, target: i64, members: &[i64], final_name: &str) -> MergeDecision {
    MergeDecision {
        group_id,
        action: MergeAction::Merge,
        merge_target_id: RecordId::from(target),
        final_name: final_name.to_string(),
        selected_member_ids: members.iter().copied().map(RecordId::from).collect(),
    }
}

fn active_count(pool: &ConnectionPool, entity: &EntityConfig) -> usize {
    SqliteCandidateRepository::new(&pool.get_connection(), entity)
        .count_active()
        .unwrap()
}

fn references_to(pool: &ConnectionPool, id: i64) -> i64 {
    pool.get_connection()
        .query_row(
            "SELECT (SELECT COUNT(*) FROM vehicles WHERE company_id = ?1)
                  + (SELECT COUNT(*) FROM weigh_events WHERE company_id = ?1)",
            [id],
            |row| row.get(0),
        )
        .unwrap()
}

fn name_of(pool: &ConnectionPool, id: i64) -> String {
    pool.get_connection()
        .query_row("SELECT name FROM companies WHERE id = ?1", [id], |row| row.get(0))
        .unwrap()
}

#[test]
fn test_moderate_threshold_groups_the_near_duplicates() {
    let pool = seeded_pool();
    let entity = companies();
    let candidates = SqliteCandidateRepository::new(&pool.get_connection(), &entity)
        .list_active()
        .unwrap();

    let groups = group(&candidates, 0.7).unwrap();
    assert_eq!(groups.len(), 1);
    let g = &groups[0];
    assert_eq!(g.main_candidate.display_name, "ABC Waste Ltd");
    assert_eq!(g.similar_candidates.len(), 1);
    assert_eq!(g.similar_candidates[0].record.display_name, "ABC Waste");
    assert_eq!(g.suggested_merge_name, "ABC Waste");
    assert!(!g.contains(&RecordId::from(3)));
}

#[test]
fn test_strict_threshold_groups_nothing() {
    let pool = seeded_pool();
    let entity = companies();
    let candidates = SqliteCandidateRepository::new(&pool.get_connection(), &entity)
        .list_active()
        .unwrap();

    assert!(group(&candidates, 0.95).unwrap().is_empty());
}

#[test]
fn test_merge_renames_marks_and_repoints() {
    let pool = seeded_pool();
    let entity = companies();
    let before = active_count(&pool, &entity);
    let moved = references_to(&pool, 2);

    let executor = MergeExecutor::new(&pool, "companies", &entity).unwrap();
    let result = executor.execute(&merge(1, 1, &[1, 2], "ABC Waste Services"));

    assert!(result.success, "{result:?}");
    assert_eq!(result.companies_merged, 1);
    assert_eq!(result.rows_repointed as i64, moved);
    assert_eq!(name_of(&pool, 1), "ABC Waste Services");
    assert_eq!(name_of(&pool, 2), "ABC Waste [MERGED]");
    assert_eq!(references_to(&pool, 2), 0);
    assert_eq!(references_to(&pool, 1), 1 + moved);
    assert_eq!(references_to(&pool, 3), 2);
    assert_eq!(active_count(&pool, &entity), before - 1);
}

#[test]
fn test_merge_of_k_members_removes_k_minus_one() {
    let pool = seeded_pool();
    pool.get_connection()
        .execute_batch(
            "INSERT INTO companies (id, name) VALUES (4, 'A.B.C. Waste'), (5, 'ABC Wastes');
             INSERT INTO vehicles (plate, company_id) VALUES ('KDD 400D', 4), ('KEE 500E', 5);",
        )
        .unwrap();
    let entity = companies();
    let before = active_count(&pool, &entity);

    let executor = MergeExecutor::new(&pool, "companies", &entity).unwrap();
    let result = executor.execute(&merge(1, 2, &[1, 2, 4, 5], "ABC Waste"));

    assert!(result.success, "{result:?}");
    assert_eq!(result.companies_merged, 3);
    assert_eq!(active_count(&pool, &entity), before - 3);
    for absorbed in [1, 4, 5] {
        assert_eq!(references_to(&pool, absorbed), 0);
        assert!(name_of(&pool, absorbed).ends_with(" [MERGED]"));
    }
    assert_eq!(references_to(&pool, 2), 6);
}

#[test]
fn test_single_member_decision_is_rejected_before_execution() {
    let pool = seeded_pool();
    let entity = companies();
    let candidates = SqliteCandidateRepository::new(&pool.get_connection(), &entity)
        .list_active()
        .unwrap();
    let groups = group(&candidates, 0.7).unwrap();

    let decision = MergeDecision::accept(&groups[0]).with_members([1]);
    assert_eq!(
        validate(&decision, &groups[0]),
        Err(ValidationError::InsufficientMembers {
            group_id: 1,
            selected: 1
        })
    );

    // even when called directly, nothing is touched
    let executor = MergeExecutor::new(&pool, "companies", &entity).unwrap();
    let err = executor.try_execute(&decision).unwrap_err();
    assert!(matches!(
        err,
        UnifyError::Validation(ValidationError::InsufficientMembers { .. })
    ));
    assert_eq!(name_of(&pool, 1), "ABC Waste Ltd");
    assert_eq!(active_count(&pool, &entity), 3);
}

#[test]
fn test_second_decision_on_absorbed_id_is_stale() {
    let pool = seeded_pool();
    let entity = companies();
    let executor = MergeExecutor::new(&pool, "companies", &entity).unwrap();

    let first = executor.execute(&merge(1, 1, &[1, 2], "ABC Waste"));
    let second = executor.execute(&merge(2, 3, &[2, 3], "XYZ Waste"));

    assert!(first.success);
    assert!(!second.success);
    let message = second.error_message.unwrap();
    assert!(message.contains("Stale group 2"), "{message}");
    assert!(message.ends_with("no longer mergeable: 2"), "{message}");

    assert_eq!(name_of(&pool, 1), "ABC Waste");
    assert_eq!(name_of(&pool, 3), "XYZ Corp");
    assert_eq!(references_to(&pool, 3), 2);
}

#[test]
fn test_batch_through_the_facade_reports_running_counters() {
    let pool = seeded_pool();
    let unifier = Unifier::new(pool, AppConfig::default());

    let outcome = unifier.compute_groups("companies", Some(0.7)).unwrap();
    let foreign = merge(1, 3, &[2, 3], "XYZ");
    let decisions = vec![MergeDecision::accept(&outcome.groups[0]), foreign];

    let outcomes: Vec<_> = unifier
        .execute_merges("companies", decisions, &outcome.groups, Some(outcome.pass.pass_number))
        .unwrap()
        .collect();

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes[0].result.success);
    assert_eq!(outcomes[0].progress.successes, 1);
    assert_eq!(outcomes[0].progress.absorbed, 1);
    // group 1 holds ids 1 and 2 only
    assert!(!outcomes[1].result.success);
    assert_eq!(outcomes[1].progress.errors, 1);

    let log = unifier.merge_log("companies", 10).unwrap();
    assert_eq!(log.len(), 2);
    assert!(!log[0].success);
    assert!(log[1].success);
}

#[test]
fn test_missing_dependent_declaration_aborts_before_any_merge() {
    let pool = seeded_pool();
    let mut config = AppConfig::default();
    config
        .entities
        .insert("companies".to_string(), EntityConfig::new("companies"));
    let unifier = Unifier::new(pool, config);

    let err = unifier
        .execute_merges("companies", Vec::<MergeDecision>::new(), &[], None)
        .err()
        .unwrap();
    assert!(matches!(err, UnifyError::Configuration(_)));
    assert!(unifier.merge_log("companies", 10).unwrap().is_empty());
    assert_eq!(name_of(unifier.pool(), 2), "ABC Waste");
}

#[test]
fn test_final_name_with_merged_suffix_is_refused() {
    let pool = seeded_pool();
    let entity = companies();
    let before = active_count(&pool, &entity);

    let executor = MergeExecutor::new(&pool, "companies", &entity).unwrap();
    let result = executor.execute(&merge(1, 1, &[1, 2], "ABC Waste [MERGED]"));

    assert!(!result.success);
    assert!(
        result.error_message.as_deref().unwrap().contains("reserved merged suffix"),
        "{result:?}"
    );
    assert_eq!(active_count(&pool, &entity), before);
    assert_eq!(name_of(&pool, 1), "ABC Waste Ltd");
    assert_eq!(references_to(&pool, 2), 3);

    let retry = executor.execute(&merge(1, 1, &[1, 2], "ABC Waste"));
    assert!(retry.success, "{retry:?}");
    assert_eq!(active_count(&pool, &entity), before - 1);
}

#[test]
fn test_decision_files_may_use_numeric_ids() {
    let pool = seeded_pool();
    let entity = companies();
    let decisions: Vec<MergeDecision> = serde_json::from_str(
        r#"[{"group_id": 1, "action": "merge", "merge_target_id": 2,
             "final_name": "ABC Waste", "selected_member_ids": [1, 2]}]"#,
    )
    .unwrap();
    assert_eq!(decisions[0].merge_target_id, RecordId::from(2));

    let executor = MergeExecutor::new(&pool, "companies", &entity).unwrap();
    assert!(executor.execute(&decisions[0]).success);
    assert_eq!(name_of(&pool, 1), "ABC Waste Ltd [MERGED]");
    assert_eq!(references_to(&pool, 2), 4);
}
