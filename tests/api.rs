// API integration tests: drive the router in-process with oneshot requests

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use kwacha_ledger::api::{self, AppState, USER_HEADER};
use kwacha_ledger::entities::user::{self, Role, UserParams};
use kwacha_ledger::services::{ExchangeRates, RateSource, RetryPolicy};
use kwacha_ledger::{db, jobs, SharedDb};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

struct FixedRate(Option<f64>);

#[async_trait]
impl RateSource for FixedRate {
    async fn fetch_usd_zmw(&self) -> Result<f64> {
        self.0.ok_or_else(|| anyhow!("rate service unavailable"))
    }
}

struct TestApp {
    router: Router,
    db: SharedDb,
}

impl TestApp {
    fn new(rate: Option<f64>) -> Self {
        let conn = Connection::open_in_memory().unwrap();
        db::setup_database(&conn).unwrap();
        let db = db::shared(conn);
        let rates = ExchangeRates::new(
            Arc::new(FixedRate(rate)),
            RetryPolicy {
                max_attempts: 2,
                base_backoff_ms: 0,
            },
        );
        let router = api::router(AppState {
            db: Arc::clone(&db),
            rates: Arc::new(rates),
        });
        TestApp { router, db }
    }

    fn create_user(&self, name: &str, email: &str, role: Role) -> i64 {
        let conn = db::lock(&self.db).unwrap();
        user::create(
            &conn,
            UserParams {
                name: Some(name.into()),
                email: Some(email.into()),
                monthly_income: Some(8000.0),
                ..Default::default()
            },
            role,
        )
        .unwrap()
        .id
    }

    async fn raw(&self, method: Method, uri: &str, user_id: Option<i64>, body: Body) -> axum::response::Response {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(id) = user_id {
            builder = builder.header(USER_HEADER, id.to_string());
        }
        self.router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap()
    }

    async fn send(&self, method: Method, uri: &str, user_id: Option<i64>, body: Option<Value>) -> (StatusCode, Value) {
        let body = body.map_or_else(Body::empty, |json| Body::from(json.to_string()));
        let response = self.raw(method, uri, user_id, body).await;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn create_category(&self, user_id: i64, name: &str) -> i64 {
        let (status, body) = self
            .send(
                Method::POST,
                "/api/categories",
                Some(user_id),
                Some(json!({ "name": name, "icon": "🍲" })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        body["data"]["id"].as_i64().unwrap()
    }
}

#[tokio::test]
async fn test_health_needs_no_user() {
    let app = TestApp::new(None);
    let (status, body) = app.send(Method::GET, "/api/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], "OK");
}

#[tokio::test]
async fn test_missing_or_unknown_user_is_unauthorized() {
    let app = TestApp::new(None);
    let (status, body) = app.send(Method::GET, "/api/categories", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, _) = app.send(Method::GET, "/api/categories", Some(999), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_sign_up_then_profile() {
    let app = TestApp::new(None);
    let (status, body) = app
        .send(
            Method::POST,
            "/api/users",
            None,
            Some(json!({ "name": "Mwila", "email": "Mwila@Example.com", "monthly_income": 6000 })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let id = body["data"]["id"].as_i64().unwrap();
    assert_eq!(body["data"]["email"], "mwila@example.com");

    let (status, body) = app.send(Method::GET, "/api/me", Some(id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["subscription"]["plan"], "free");
    assert_eq!(body["data"]["max_categories"], 10);
    assert_eq!(body["data"]["over_indebted"], false);

    // Same email again
    let (status, body) = app
        .send(
            Method::POST,
            "/api/users",
            None,
            Some(json!({ "name": "Mwila B", "email": "mwila@example.com" })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["errors"][0]["field"], "email");
}

#[tokio::test]
async fn test_category_and_payment_crud() {
    let app = TestApp::new(None);
    let me = app.create_user("Chanda", "chanda@zm.com", Role::Default);
    let category_id = app.create_category(me, "Food").await;

    let uri = format!("/api/categories/{}/payments", category_id);
    let (status, body) = app
        .send(
            Method::POST,
            &uri,
            Some(me),
            Some(json!({ "name": "Mealie meal", "amount": 180.0, "payment_method": "mtn_momo" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let payment_id = body["data"]["id"].as_i64().unwrap();

    let (status, body) = app.send(Method::GET, &uri, Some(me), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["total_amount"], 180.0);

    let payment_uri = format!("{}/{}", uri, payment_id);
    let (status, body) = app
        .send(Method::PATCH, &payment_uri, Some(me), Some(json!({ "amount": 200.0 })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["amount"], 200.0);

    let (status, body) = app
        .send(Method::GET, &format!("/api/categories/{}", category_id), Some(me), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], "Food");
    assert_eq!(body["data"]["total_amount"], 200.0);
    assert_eq!(body["data"]["payments"].as_array().unwrap().len(), 1);

    let (status, _) = app.send(Method::DELETE, &payment_uri, Some(me), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = app.send(Method::GET, &payment_uri, Some(me), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_records_of_other_users_are_not_found() {
    let app = TestApp::new(None);
    let owner = app.create_user("Chanda", "chanda@zm.com", Role::Default);
    let intruder = app.create_user("Bwalya", "bwalya@zm.com", Role::Default);
    let category_id = app.create_category(owner, "Transport").await;

    let uri = format!("/api/categories/{}", category_id);
    let (status, body) = app.send(Method::GET, &uri, Some(intruder), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Category not found");

    let (status, _) = app.send(Method::DELETE, &uri, Some(intruder), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .send(
            Method::POST,
            &format!("{}/payments", uri),
            Some(intruder),
            Some(json!({ "name": "Bus", "amount": 10.0 })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Still there for its owner
    let (status, _) = app.send(Method::GET, &uri, Some(owner), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_invalid_payment_is_unprocessable() {
    let app = TestApp::new(None);
    let me = app.create_user("Chanda", "chanda@zm.com", Role::Default);
    let category_id = app.create_category(me, "Food").await;

    let (status, body) = app
        .send(
            Method::POST,
            &format!("/api/categories/{}/payments", category_id),
            Some(me),
            Some(json!({ "name": "Refund", "amount": -5.0 })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let fields: Vec<&str> = body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["field"].as_str())
        .collect();
    assert!(fields.contains(&"amount"));
}

#[tokio::test]
async fn test_user_listing_is_admin_only() {
    let app = TestApp::new(None);
    let member = app.create_user("Chanda", "chanda@zm.com", Role::Default);
    let admin = app.create_user("Admin", "admin@zm.com", Role::Admin);

    let (status, _) = app.send(Method::GET, "/api/users", Some(member), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.send(Method::GET, "/api/users", Some(admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_goal_progress_completes_goal() {
    let app = TestApp::new(None);
    let me = app.create_user("Chanda", "chanda@zm.com", Role::Default);

    let (status, body) = app
        .send(
            Method::POST,
            "/api/goals",
            Some(me),
            Some(json!({
                "name": "Emergency fund",
                "target_amount": 5000.0,
                "start_date": "2026-01-01",
                "target_date": "2030-12-31",
                "goal_type": "saving"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    let goal_uri = format!("/api/goals/{}/progress", body["data"]["id"].as_i64().unwrap());

    let (status, body) = app
        .send(Method::PATCH, &goal_uri, Some(me), Some(json!({ "current_amount": 2500.0 })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["progress_percentage"], 50.0);
    assert_eq!(body["data"]["completed"], false);

    let (status, body) = app
        .send(Method::PATCH, &goal_uri, Some(me), Some(json!({ "current_amount": 5000.0 })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["completed"], true);
    assert_eq!(body["data"]["trend_data"].as_array().unwrap().len(), 2);

    let (status, _) = app
        .send(Method::PATCH, &goal_uri, Some(me), Some(json!({ "current_amount": -1.0 })))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);

    let (status, body) = app.send(Method::GET, "/api/goals", Some(me), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["completed_goals"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_dashboard_shape() {
    let app = TestApp::new(None);
    let me = app.create_user("Chanda", "chanda@zm.com", Role::Default);
    let category_id = app.create_category(me, "Food").await;
    app.send(
        Method::POST,
        &format!("/api/categories/{}/payments", category_id),
        Some(me),
        Some(json!({ "name": "Groceries", "amount": 300.0 })),
    )
    .await;

    let (status, body) = app
        .send(Method::GET, "/api/dashboard?start_date=nonsense", Some(me), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let data = &body["data"];
    assert_eq!(data["total_spending"], 300.0);
    assert_eq!(data["monthly_spending_trend"]["labels"].as_array().unwrap().len(), 6);
    assert_eq!(data["monthly_spending_trend"]["values"].as_array().unwrap().len(), 6);
    assert_eq!(data["recent_payments"][0]["category_name"], "Food");
}

#[tokio::test]
async fn test_export_requires_a_paid_plan() {
    let app = TestApp::new(None);
    let me = app.create_user("Chanda", "chanda@zm.com", Role::Default);

    let (status, _) = app.send(Method::GET, "/api/payments/export", Some(me), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send(
            Method::POST,
            "/api/subscription/upgrade",
            Some(me),
            Some(json!({ "plan_name": "standard" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["plan"], "standard");
    assert_eq!(body["data"]["is_active"], true);

    let csv = "date,name,amount,category\n2026-01-05,Mealie meal,180,Food\n";
    let response = app
        .raw(Method::POST, "/api/payments/import", Some(me), Body::from(csv))
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = app.raw(Method::GET, "/api/payments/export", Some(me), Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/csv"));
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let exported = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(exported.contains("Mealie meal"));
}

#[tokio::test]
async fn test_exchange_rate_live_and_conversion() {
    let app = TestApp::new(Some(27.5));
    let me = app.create_user("Chanda", "chanda@zm.com", Role::Default);

    let (status, body) = app
        .send(Method::GET, "/api/economic/exchange_rate", Some(me), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["rate"], 27.5);
    assert_eq!(body["data"]["origin"], "live");

    let (status, body) = app
        .send(Method::GET, "/api/economic/convert?amount=10&from=usd&to=zmw", Some(me), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["converted"], 275.0);

    let (_, body) = app
        .send(Method::GET, "/api/economic/convert?amount=10&from=USD&to=EUR", Some(me), None)
        .await;
    assert_eq!(body["data"]["converted"], Value::Null);
}

#[tokio::test]
async fn test_exchange_rate_falls_back_to_stored_indicator() {
    let app = TestApp::new(None);
    let me = app.create_user("Chanda", "chanda@zm.com", Role::Default);

    let (status, _) = app
        .send(Method::GET, "/api/economic/exchange_rate", Some(me), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    {
        let conn = db::lock(&app.db).unwrap();
        jobs::seed_economic_data(&conn).unwrap();
    }
    let (status, body) = app
        .send(Method::GET, "/api/economic/exchange_rate", Some(me), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["origin"], "stored");
    assert!(body["data"]["rate"].as_f64().unwrap() > 0.0);

    let (status, body) = app.send(Method::GET, "/api/economic", Some(me), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["latest_bnnb"]["location"], "Lusaka");
}
