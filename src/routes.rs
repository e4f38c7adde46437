use actix_cors::Cors;
use actix_web::{error, get, post, web, HttpResponse, Responder};
use log::{debug, error, info};
use serde_json::json;

use crate::config::short_endpoint;
use crate::models::{AlertPayload, PushSubscription, VapidKeyResponse};
use crate::relay::Relay;

#[get("/vapidPublicKey")]
async fn vapid_public_key(relay: web::Data<Relay>) -> impl Responder {
    HttpResponse::Ok().json(VapidKeyResponse {
        key: relay.vapid_public_key().to_string(),
    })
}

#[post("/subscribe")]
async fn subscribe(payload: web::Json<PushSubscription>, relay: web::Data<Relay>) -> impl Responder {
    if payload.endpoint.trim().is_empty() {
        debug!("subscribe:: rejected subscription without endpoint");
        return HttpResponse::BadRequest().json(json!({ "message": "Subscription endpoint missing" }));
    }
    let endpoint = payload.endpoint.clone();
    if relay.subscribe(payload.into_inner()).await {
        info!("subscribe:: registered {}", short_endpoint(&endpoint));
    }
    HttpResponse::Created().json(json!({ "message": "Subscription registered" }))
}

#[post("/notify")]
async fn notify(payload: web::Json<AlertPayload>, relay: web::Data<Relay>) -> impl Responder {
    let report = relay.broadcast(&payload).await;
    HttpResponse::Ok().json(report)
}

#[get("/health")]
pub async fn health() -> impl Responder {
    info!("Health check");
    HttpResponse::Ok()
}

pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| {
        error!("Json config error: {}", err);
        error::InternalError::from_response(err, HttpResponse::BadRequest().into()).into()
    })
}

/// Planner pages are served from their own origin and call the relay
/// cross-origin.
pub fn cors() -> Cors {
    Cors::default()
        .allow_any_origin()
        .allow_any_method()
        .allow_any_header()
        .max_age(3600)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .service(vapid_public_key)
        .service(subscribe)
        .service(notify)
        .service(health);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NotifyReport;
    use crate::relay::tests::{subscription, FakeDelivery};
    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use std::collections::HashSet;
    use std::sync::Arc;

    fn relay(gone: &[&str]) -> web::Data<Relay> {
        let delivery = FakeDelivery {
            gone: gone.iter().map(|e| e.to_string()).collect::<HashSet<_>>(),
            ..Default::default()
        };
        web::Data::new(Relay::new("BPublicKey", Arc::new(delivery)))
    }

    #[actix_web::test]
    async fn serves_the_public_key() {
        let app = test::init_service(App::new().app_data(relay(&[])).configure(configure)).await;
        let req = test::TestRequest::get().uri("/vapidPublicKey").to_request();
        let body: VapidKeyResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body.key, "BPublicKey");
    }

    #[actix_web::test]
    async fn subscribe_is_created_and_deduplicated() {
        let data = relay(&[]);
        let app = test::init_service(App::new().app_data(data.clone()).configure(configure)).await;

        for _ in 0..2 {
            let req = test::TestRequest::post()
                .uri("/subscribe")
                .set_json(subscription("https://push.example/a"))
                .to_request();
            let res = test::call_service(&app, req).await;
            assert_eq!(res.status(), StatusCode::CREATED);
            let body: serde_json::Value = test::read_body_json(res).await;
            assert_eq!(body["message"], "Subscription registered");
        }
        assert_eq!(data.subscription_count().await, 1);
    }

    #[actix_web::test]
    async fn notify_reports_sent_and_prunes_gone() {
        let data = relay(&["https://push.example/old"]);
        data.subscribe(subscription("https://push.example/a")).await;
        data.subscribe(subscription("https://push.example/old")).await;
        let app = test::init_service(App::new().app_data(data.clone()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/notify")
            .set_json(json!({ "title": "Reminder", "body": "Call Sam", "data": {} }))
            .to_request();
        let report: NotifyReport = test::call_and_read_body_json(&app, req).await;
        assert_eq!(report, NotifyReport { sent: 1, total: 1 });
    }

    #[actix_web::test]
    async fn malformed_json_is_a_bad_request() {
        let app = test::init_service(App::new().app_data(relay(&[])).configure(configure)).await;
        let req = test::TestRequest::post()
            .uri("/subscribe")
            .insert_header(("content-type", "application/json"))
            .set_payload("{not json")
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let empty = test::TestRequest::post()
            .uri("/subscribe")
            .set_json(json!({ "endpoint": "", "keys": { "p256dh": "x", "auth": "y" } }))
            .to_request();
        assert_eq!(test::call_service(&app, empty).await.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn cross_origin_pages_are_allowed() {
        let app = test::init_service(
            App::new()
                .wrap(cors())
                .app_data(relay(&[]))
                .configure(configure),
        )
        .await;

        let req = test::TestRequest::get()
            .uri("/vapidPublicKey")
            .insert_header(("Origin", "http://localhost:5173"))
            .to_request();
        let res = test::call_service(&app, req).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().contains_key("access-control-allow-origin"));

        let preflight = test::TestRequest::default()
            .method(actix_web::http::Method::OPTIONS)
            .uri("/subscribe")
            .insert_header(("Origin", "http://localhost:5173"))
            .insert_header(("Access-Control-Request-Method", "POST"))
            .insert_header(("Access-Control-Request-Headers", "content-type"))
            .to_request();
        let res = test::call_service(&app, preflight).await;
        assert!(res.status().is_success());
        assert!(res.headers().contains_key("access-control-allow-methods"));
    }

    #[actix_web::test]
    async fn health_is_ok() {
        let app = test::init_service(App::new().configure(configure)).await;
        let req = test::TestRequest::get().uri("/health").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);
    }
}
