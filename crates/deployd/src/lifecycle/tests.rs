use super::*;

use crate::db::tests::{sample_service, temp_db};
use crate::quota::StaticQuota;
use crate::runtime::mock::MockRuntime;

fn manager_with(db: DbClient, runtime: Arc<MockRuntime>, max_services: i64) -> ServiceLifecycleManager {
    ServiceLifecycleManager::new(
        db,
        runtime,
        Arc::new(StaticQuota::new(max_services)),
        "free".to_string(),
    )
}

async fn test_manager() -> (ServiceLifecycleManager, DbClient, Arc<MockRuntime>) {
    let db = temp_db().await;
    let runtime = Arc::new(MockRuntime::default());
    let manager = manager_with(db.clone(), runtime.clone(), 10);
    (manager, db, runtime)
}

fn docker_input(name: &str) -> CreateServiceInput {
    CreateServiceInput {
        name: name.to_string(),
        service_type: ServiceType::Docker,
        environment_id: None,
        repo_url: Some("https://github.com/acme/widgets".to_string()),
        branch: None,
        build_command: None,
        start_command: Some("npm start".to_string()),
        static_output_dir: None,
        port: None,
        env_vars: BTreeMap::new(),
        custom_domain: None,
    }
}

#[tokio::test]
async fn create_fills_type_defaults() {
    let (manager, _db, _runtime) = test_manager().await;

    let docker = manager
        .create_or_update("owner-1", docker_input("api"))
        .await
        .expect("create");
    assert_eq!(docker.port, 3000);
    assert_eq!(docker.branch, "main");
    assert_eq!(docker.status, "IDLE");

    let mut static_input = docker_input("site");
    static_input.service_type = ServiceType::Static;
    let static_site = manager
        .create_or_update("owner-1", static_input)
        .await
        .expect("create");
    assert_eq!(static_site.port, 80);
}

#[tokio::test]
async fn datastore_creation_generates_credentials_once() {
    let (manager, _db, _runtime) = test_manager().await;

    let mut input = docker_input("db");
    input.service_type = ServiceType::Postgres;
    input
        .env_vars
        .insert("POSTGRES_USER".to_string(), "custom".to_string());

    let service = manager
        .create_or_update("owner-1", input)
        .await
        .expect("create");
    assert_eq!(service.port, 5444);

    let env = service.env_map();
    // Caller-provided values are kept; missing ones are generated.
    assert_eq!(env.get("POSTGRES_USER").map(String::as_str), Some("custom"));
    assert_eq!(env.get("POSTGRES_DB").map(String::as_str), Some("db"));
    let password = env.get("POSTGRES_PASSWORD").expect("generated password");
    assert_eq!(password.len(), 32);
    assert!(password.chars().all(|ch| ch.is_ascii_alphanumeric()));
}

#[tokio::test]
async fn generated_password_survives_explicit_override() {
    let (manager, _db, _runtime) = test_manager().await;

    let mut input = docker_input("db");
    input.service_type = ServiceType::Postgres;
    let service = manager
        .create_or_update("owner-1", input)
        .await
        .expect("create");
    let generated = service
        .env_map()
        .get("POSTGRES_PASSWORD")
        .cloned()
        .expect("generated password");

    let mut again = docker_input("db");
    again.service_type = ServiceType::Postgres;
    again
        .env_vars
        .insert("POSTGRES_PASSWORD".to_string(), "attacker-chosen".to_string());
    let updated = manager
        .create_or_update("owner-1", again)
        .await
        .expect("update");

    assert_eq!(
        updated.env_map().get("POSTGRES_PASSWORD"),
        Some(&generated)
    );
}

#[tokio::test]
async fn create_over_existing_name_updates_in_place() {
    let (manager, _db, _runtime) = test_manager().await;

    let first = manager
        .create_or_update("owner-1", docker_input("api"))
        .await
        .expect("create");

    let mut second = docker_input("api");
    second.port = Some(8080);
    second
        .env_vars
        .insert("FEATURE_FLAG".to_string(), "on".to_string());
    let updated = manager
        .create_or_update("owner-1", second)
        .await
        .expect("update");

    assert_eq!(updated.id, first.id);
    assert_eq!(updated.port, 8080);
    assert_eq!(
        updated.env_map().get("FEATURE_FLAG").map(String::as_str),
        Some("on")
    );
}

#[tokio::test]
async fn create_over_tombstone_resurrects_the_row() {
    let (manager, _db, _runtime) = test_manager().await;

    let service = manager
        .create_or_update("owner-1", docker_input("api"))
        .await
        .expect("create");
    manager
        .soft_delete("owner-1", &service.id)
        .await
        .expect("soft delete");

    let mut input = docker_input("api");
    input.port = Some(8080);
    let revived = manager
        .create_or_update("owner-1", input)
        .await
        .expect("resurrect");

    // Same row, tombstone cleared, new definition applied.
    assert_eq!(revived.id, service.id);
    assert!(!revived.is_deleted());
    assert_eq!(revived.status, "IDLE");
    assert_eq!(revived.port, 8080);
}

#[tokio::test]
async fn name_validation_rejects_bad_input() {
    let (manager, _db, _runtime) = test_manager().await;

    let too_long = "x".repeat(64);
    for bad in ["", "  ", "-api", "api-", "has space", "emoji🚀", too_long.as_str()] {
        let result = manager
            .create_or_update("owner-1", docker_input(bad))
            .await;
        assert!(
            matches!(result, Err(EngineError::Validation(_))),
            "expected validation error for {bad:?}"
        );
    }

    // Names are case-normalized, not rejected.
    let service = manager
        .create_or_update("owner-1", docker_input("My-API"))
        .await
        .expect("create");
    assert_eq!(service.name, "my-api");
}

#[tokio::test]
async fn quota_caps_creation_but_not_previews() {
    let db = temp_db().await;
    let runtime = Arc::new(MockRuntime::default());
    let manager = manager_with(db.clone(), runtime, 1);

    let base = manager
        .create_or_update("owner-1", docker_input("api"))
        .await
        .expect("create");

    let over = manager
        .create_or_update("owner-1", docker_input("web"))
        .await;
    assert!(matches!(over, Err(EngineError::Forbidden(_))));

    // Previews are exempt from the cap.
    let preview = manager
        .upsert_preview(&base, 7, "feature/login")
        .await
        .expect("preview");
    assert_eq!(preview.name, "api-pr-7");
    assert!(preview.is_preview);
    assert_eq!(preview.preview_pr_number, Some(7));
    assert_eq!(preview.branch, "feature/login");
}

#[tokio::test]
async fn upsert_preview_is_idempotent_and_resets_status() {
    let (manager, db, _runtime) = test_manager().await;
    let base = manager
        .create_or_update("owner-1", docker_input("api"))
        .await
        .expect("create");

    let first = manager
        .upsert_preview(&base, 7, "feature/login")
        .await
        .expect("preview");

    // A new push to the PR finds the preview mid-run and winds it back.
    db.set_service_status(&first.id, "RUNNING")
        .await
        .expect("status");
    let second = manager
        .upsert_preview(&base, 7, "feature/login-v2")
        .await
        .expect("preview again");

    assert_eq!(first.id, second.id);
    assert_eq!(second.branch, "feature/login-v2");
    assert_eq!(second.status, "IDLE");
}

#[tokio::test]
async fn soft_delete_tombstones_even_when_reclaim_fails() {
    let (manager, db, runtime) = test_manager().await;
    let service = manager
        .create_or_update("owner-1", docker_input("api"))
        .await
        .expect("create");

    runtime.add_container("c1", "running", &[(reclaim::SERVICE_ID_LABEL, service.id.as_str())]);
    *runtime
        .fail_container_removal
        .lock()
        .expect("fail flag lock") = true;

    let report = manager
        .soft_delete("owner-1", &service.id)
        .await
        .expect("soft delete");
    assert!(!report.fully_clean());

    // The tombstone is authoritative despite the engine failure.
    let row = db
        .get_service(&service.id)
        .await
        .expect("get")
        .expect("row survives");
    assert!(row.is_deleted());
    assert!(manager.get_service("owner-1", &service.id).await.is_err());
}

#[tokio::test]
async fn delete_protection_blocks_both_delete_flavors() {
    let (manager, _db, _runtime) = test_manager().await;
    let service = manager
        .create_or_update("owner-1", docker_input("api"))
        .await
        .expect("create");

    manager
        .set_delete_protection("owner-1", &service.id, true)
        .await
        .expect("protect");

    let soft = manager.soft_delete("owner-1", &service.id).await;
    assert!(matches!(soft, Err(EngineError::Forbidden(_))));

    let hard = manager.hard_delete(Some("owner-1"), &service.id).await;
    assert!(matches!(hard, Err(EngineError::Forbidden(_))));

    manager
        .set_delete_protection("owner-1", &service.id, false)
        .await
        .expect("unprotect");
    manager
        .soft_delete("owner-1", &service.id)
        .await
        .expect("soft delete");
}

#[tokio::test]
async fn recover_clears_tombstone_and_guards_name_collisions() {
    let (manager, db, _runtime) = test_manager().await;
    let service = manager
        .create_or_update("owner-1", docker_input("api"))
        .await
        .expect("create");

    // Recovering a live service is a conflict.
    let premature = manager.recover("owner-1", &service.id).await;
    assert!(matches!(premature, Err(EngineError::Conflict(_))));

    db.set_service_status(&service.id, "RUNNING")
        .await
        .expect("status");
    manager
        .soft_delete("owner-1", &service.id)
        .await
        .expect("soft delete");
    let recovered = manager
        .recover("owner-1", &service.id)
        .await
        .expect("recover");
    // Only the tombstone moves; everything else is as it was.
    assert!(!recovered.is_deleted());
    assert_eq!(recovered.status, "RUNNING");

    // Once another live row holds the name, the tombstoned one can no
    // longer come back.
    manager
        .soft_delete("owner-1", &service.id)
        .await
        .expect("soft delete again");
    db.insert_service(&sample_service("svc-other", "owner-1", "api"))
        .await
        .expect("insert rival row");
    let blocked = manager.recover("owner-1", &service.id).await;
    assert!(matches!(blocked, Err(EngineError::Conflict(_))));
}

#[tokio::test]
async fn hard_delete_is_idempotent_and_sweeps_everything() {
    let (manager, db, runtime) = test_manager().await;
    let service = manager
        .create_or_update("owner-1", docker_input("api"))
        .await
        .expect("create");

    runtime.add_container(
        "c1",
        "running",
        &[(reclaim::SERVICE_ID_LABEL, service.id.as_str())],
    );

    let report = manager
        .hard_delete(Some("owner-1"), &service.id)
        .await
        .expect("hard delete")
        .expect("service existed");
    assert!(report.fully_clean());
    assert_eq!(
        runtime
            .removed_containers
            .lock()
            .expect("removed lock")
            .clone(),
        vec!["c1".to_string()]
    );
    assert!(db.get_service(&service.id).await.expect("get").is_none());

    // Deleting again is a quiet no-op.
    let again = manager
        .hard_delete(Some("owner-1"), &service.id)
        .await
        .expect("hard delete again");
    assert!(again.is_none());
}

#[tokio::test]
async fn ownership_mismatch_reads_as_missing() {
    let (manager, _db, _runtime) = test_manager().await;
    let service = manager
        .create_or_update("owner-1", docker_input("api"))
        .await
        .expect("create");

    assert!(matches!(
        manager.get_service("owner-2", &service.id).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        manager.soft_delete("owner-2", &service.id).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        manager.hard_delete(Some("owner-2"), &service.id).await,
        Err(EngineError::NotFound(_))
    ));
}
