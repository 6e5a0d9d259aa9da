use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use docket_api::app::services::AppServices;
use docket_auth::{AuditAction, AuditEntity, AuditEntry, JwtClaims, Membership, Organization, RoleAssignment, UserAccount};
use docket_core::{OrganizationId, UserId};
use docket_infra::store::{IdentityStore, RoleStore, TenantDirectory};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{json, Value};

const JWT_SECRET: &str = "test-secret";

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(services: Arc<AppServices>) -> Self {
        // Same router as prod, bound to an ephemeral port.
        let app = docket_api::app::build_app(services, JWT_SECRET.to_string());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn mint_jwt(user_id: UserId) -> String {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: user_id,
        issued_at: now,
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

struct Court {
    srv: TestServer,
    services: Arc<AppServices>,
    client: reqwest::Client,
    org: OrganizationId,
    other_org: OrganizationId,
    owner: String,
}

impl Court {
    async fn user(&self, email: &str, member_of: Option<OrganizationId>) -> UserId {
        let user = UserAccount::new(email, Utc::now());
        let id = user.id;
        self.services.store.insert_user(user).await.unwrap();
        if let Some(org) = member_of {
            self.services
                .store
                .upsert_membership(Membership::new(id, org, true, Utc::now()))
                .await
                .unwrap();
        }
        id
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.srv.base_url, path)
    }

    async fn get(&self, token: &str, path: &str) -> (StatusCode, Value) {
        let res = self.client.get(self.url(path)).bearer_auth(token).send().await.unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn send(&self, method: reqwest::Method, token: &str, path: &str, body: Value) -> (StatusCode, Value) {
        let res = self
            .client
            .request(method, self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn delete(&self, token: &str, path: &str) -> (StatusCode, Value) {
        let res = self.client.delete(self.url(path)).bearer_auth(token).send().await.unwrap();
        let status = res.status();
        (status, res.json().await.unwrap_or(Value::Null))
    }

    async fn permissions_of(&self, token: &str) -> Vec<String> {
        let (status, body) = self.get(token, "/rbac/me/permissions").await;
        assert_eq!(status, StatusCode::OK);
        body["permissions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p.as_str().unwrap().to_string())
            .collect()
    }
}

async fn court() -> Court {
    let services = Arc::new(AppServices::in_memory());
    services.admin.seed_catalog().await.unwrap();

    let now = Utc::now();
    let org = Organization::new("District Court", None, now);
    let other = Organization::new("Appeals Court", None, now);
    let (org_id, other_id) = (org.id, other.id);
    services.store.insert_organization(org).await.unwrap();
    services.store.insert_organization(other).await.unwrap();
    services.admin.seed_organization(org_id).await.unwrap();
    services.admin.seed_organization(other_id).await.unwrap();

    let owner = UserAccount::new("owner@court.example", now);
    let owner_id = owner.id;
    services.store.insert_user(owner).await.unwrap();
    services
        .store
        .upsert_membership(Membership::new(owner_id, org_id, true, now))
        .await
        .unwrap();
    let owner_role = services.store.get_role_by_slug(org_id, "owner").await.unwrap().unwrap();
    let assignment = RoleAssignment::new(owner_id, owner_role.id, org_id, None, None, now).unwrap();
    let audit = AuditEntry::new(None, AuditAction::RoleAssigned, AuditEntity::RoleAssignment, assignment.id, "bootstrap", now)
        .in_organization(org_id);
    services.store.insert_assignment(assignment, now, audit).await.unwrap();

    Court {
        srv: TestServer::spawn(Arc::clone(&services)).await,
        services,
        client: reqwest::Client::new(),
        org: org_id,
        other_org: other_id,
        owner: mint_jwt(owner_id),
    }
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let c = court().await;

    let res = c.client.get(c.url("/whoami")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = c.client.get(c.url("/whoami")).bearer_auth("not-a-jwt").send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = c.client.get(c.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn tenant_context_is_resolved_server_side() {
    let c = court().await;
    let (status, body) = c.get(&c.owner, "/whoami").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["organization_id"].as_str().unwrap(), c.org.to_string());
    assert_eq!(body["is_super_admin"], json!(false));

    // A valid token for a user the directory does not know.
    let (status, _) = c.get(&mint_jwt(UserId::new()), "/whoami").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn users_without_an_organization_are_sent_to_selection() {
    let c = court().await;
    let drifter = c.user("drifter@court.example", None).await;
    let token = mint_jwt(drifter);

    let (status, body) = c.get(&token, "/rbac/me/permissions").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "no_tenant_context");

    let (status, body) = c
        .send(reqwest::Method::POST, &token, "/organizations/switch", json!({ "organization_id": c.org }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "not_a_member");

    c.services
        .store
        .upsert_membership(Membership::new(drifter, c.other_org, false, Utc::now()))
        .await
        .unwrap();
    let (status, _) = c
        .send(
            reqwest::Method::POST,
            &token,
            "/organizations/switch",
            json!({ "organization_id": c.other_org }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = c.get(&token, "/whoami").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["organization_id"].as_str().unwrap(), c.other_org.to_string());
}

#[tokio::test]
async fn role_lifecycle_drives_effective_permissions() {
    let c = court().await;
    let clerk = c.user("clerk@court.example", Some(c.org)).await;
    let clerk_token = mint_jwt(clerk);
    assert!(c.permissions_of(&clerk_token).await.is_empty());

    let (status, role) = c
        .send(
            reqwest::Method::POST,
            &c.owner,
            "/rbac/roles",
            json!({ "slug": "intake", "name": "Intake", "permissions": ["evidence:create", "evidence:read"] }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, assignment) = c
        .send(
            reqwest::Method::POST,
            &c.owner,
            "/rbac/assignments",
            json!({ "user_id": clerk, "role_id": role["id"] }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(
        c.permissions_of(&clerk_token).await,
        vec!["evidence:create".to_string(), "evidence:read".to_string()]
    );

    let (status, _) = c
        .send(
            reqwest::Method::POST,
            &c.owner,
            "/rbac/overrides",
            json!({ "user_id": clerk, "permission": "evidence:create", "effect": "deny", "reason": "sealed docket" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(c.permissions_of(&clerk_token).await, vec!["evidence:read".to_string()]);

    let (status, why) = c.get(&clerk_token, "/rbac/me/explain?permission=evidence:create").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(why["granted"], json!(false));
    assert_eq!(why["decided_by"], "explicit_deny");

    let path = format!("/rbac/assignments/{}", assignment["id"].as_str().unwrap());
    let (status, body) = c.delete(&c.owner, &path).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "revoked");
    let (status, body) = c.delete(&c.owner, &path).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "already_inactive");

    assert!(c.permissions_of(&clerk_token).await.is_empty());
}

#[tokio::test]
async fn missing_permission_is_forbidden() {
    let c = court().await;
    let viewer = c.user("viewer@court.example", Some(c.org)).await;
    let token = mint_jwt(viewer);

    let (status, body) = c
        .send(
            reqwest::Method::POST,
            &token,
            "/rbac/roles",
            json!({ "slug": "sneaky", "name": "Sneaky" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "permission_denied");

    let (status, _) = c.get(&token, "/rbac/audit").await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn other_tenants_rows_are_not_found() {
    let c = court().await;
    let foreign = c
        .services
        .store
        .get_role_by_slug(c.other_org, "clerk")
        .await
        .unwrap()
        .unwrap();

    let (status, body) = c.get(&c.owner, &format!("/rbac/roles/{}", foreign.id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let (status, _) = c.delete(&c.owner, &format!("/rbac/roles/{}", foreign.id)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, roles) = c.get(&c.owner, "/rbac/roles").await;
    assert_eq!(status, StatusCode::OK);
    assert!(roles
        .as_array()
        .unwrap()
        .iter()
        .all(|r| r["organization_id"].as_str().unwrap() == c.org.to_string()));
}

#[tokio::test]
async fn system_roles_are_immutable_over_http() {
    let c = court().await;
    let judge = c.services.store.get_role_by_slug(c.org, "judge").await.unwrap().unwrap();

    let (status, body) = c
        .send(
            reqwest::Method::PATCH,
            &c.owner,
            &format!("/rbac/roles/{}", judge.id),
            json!({ "name": "Magistrate" }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "conflict");

    let (status, _) = c
        .send(
            reqwest::Method::PUT,
            &c.owner,
            &format!("/rbac/roles/{}/permissions", judge.id),
            json!({ "permissions": [] }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, role) = c.get(&c.owner, &format!("/rbac/roles/{}", judge.id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(role["name"], "Judge");
    assert!(!role["permissions"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn audit_trail_lists_mutations_newest_first() {
    let c = court().await;
    c.send(
        reqwest::Method::POST,
        &c.owner,
        "/rbac/roles",
        json!({ "slug": "archivist", "name": "Archivist" }),
    )
    .await;

    let (status, entries) = c.get(&c.owner, "/rbac/audit?limit=1").await;
    assert_eq!(status, StatusCode::OK);
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["action"], "RoleCreated");
    assert_eq!(entries[0]["description"], "Created role 'archivist'");
}

#[tokio::test]
async fn super_admin_routes_are_guarded() {
    let c = court().await;
    let (status, _) = c.get(&c.owner, "/admin/organizations").await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let mut root = UserAccount::new("root@court.example", Utc::now());
    root.is_super_admin = true;
    let root_id = root.id;
    c.services.store.insert_user(root).await.unwrap();
    let root_token = mint_jwt(root_id);

    // Super admins still need a current organization to act in.
    let (status, _) = c
        .send(
            reqwest::Method::POST,
            &root_token,
            "/organizations/switch",
            json!({ "organization_id": c.other_org }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, orgs) = c.get(&root_token, "/admin/organizations").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(orgs.as_array().unwrap().len(), 2);

    let (status, body) = c.get(&root_token, "/rbac/me/permissions").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["is_super_admin"], json!(true));
    assert_eq!(body["roles"], json!(["super-admin"]));

    let clerk = c.user("promoted@court.example", Some(c.org)).await;
    let res = c
        .client
        .put(c.url(&format!("/admin/users/{clerk}/super-admin")))
        .bearer_auth(&root_token)
        .json(&json!({ "is_super_admin": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let (status, global) = c.get(&root_token, "/admin/audit").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(global[0]["action"], "SuperAdminGranted");
}
