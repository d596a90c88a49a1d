#![allow(dead_code)]

use chrono::Utc;
use producer_market::{
    AppConfig, AppState, MemoryRepository, MockSmsSender,
    auth::hash_password,
    models::{CreateCategoryRequest, CreateProductRequest, Product, User},
    repository::{Repository, RepositoryState},
    sms::SmsState,
};
use rust_decimal::Decimal;
use std::{str::FromStr, sync::Arc};
use uuid::Uuid;

pub const CUSTOMER_PHONE: &str = "+15551230001";
pub const ADMIN_PHONE: &str = "+15559990000";
pub const ADMIN_PASSWORD: &str = "correct horse battery staple";

pub fn dec(raw: &str) -> Decimal {
    Decimal::from_str(raw).expect("valid decimal literal")
}

/// Everything a test needs: the concrete store and SMS mock plus the wired state.
pub struct TestContext {
    pub memory: Arc<MemoryRepository>,
    pub sms: MockSmsSender,
    pub state: AppState,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let memory = Arc::new(MemoryRepository::new());
        let sms = MockSmsSender::new();
        let state = AppState {
            repo: memory.clone() as RepositoryState,
            sms: Arc::new(sms.clone()) as SmsState,
            config,
        };
        Self { memory, sms, state }
    }

    pub fn repo(&self) -> &RepositoryState {
        &self.state.repo
    }

    pub async fn product(&self, name: &str, price: &str, stock: i32) -> Product {
        self.memory
            .create_product(CreateProductRequest {
                category_id: None,
                name: name.to_string(),
                description: Some(format!("Fresh {name} from the valley")),
                unit: "kg".to_string(),
                price: dec(price),
                stock,
            })
            .await
            .expect("seed product")
    }

    pub async fn product_in(&self, slug: &str, name: &str, price: &str, stock: i32) -> Product {
        let category = match self
            .memory
            .list_categories(true)
            .await
            .expect("list categories")
            .into_iter()
            .find(|category| category.slug == slug)
        {
            Some(category) => category,
            None => self
                .memory
                .create_category(CreateCategoryRequest {
                    name: slug.to_string(),
                    slug: slug.to_string(),
                    description: None,
                })
                .await
                .expect("seed category"),
        };
        self.memory
            .create_product(CreateProductRequest {
                category_id: Some(category.id),
                name: name.to_string(),
                description: None,
                unit: "jar".to_string(),
                price: dec(price),
                stock,
            })
            .await
            .expect("seed product")
    }

    pub async fn admin(&self) -> User {
        let hash = hash_password(ADMIN_PASSWORD).expect("hash");
        self.memory
            .upsert_admin(ADMIN_PHONE, &hash)
            .await
            .expect("seed admin")
    }

    pub async fn customer(&self) -> User {
        let user = User {
            id: Uuid::new_v4(),
            phone: CUSTOMER_PHONE.to_string(),
            role: "customer".to_string(),
            password_hash: None,
            created_at: Utc::now(),
        };
        self.memory.insert_user(user.clone()).await;
        user
    }

    /// Runs the SMS flow end to end and returns the verified session id.
    pub async fn verified_session(&self, phone: &str) -> Uuid {
        let service = self.state.verification();
        let started = service.start(phone).await.expect("start verification");
        let code = self.sms.last_code_for(phone).expect("code was sent");
        service
            .confirm(started.verification_id, &code)
            .await
            .expect("confirm verification");
        started.verification_id
    }
}
