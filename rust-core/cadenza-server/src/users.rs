//! Demonstration controllers: a health check and an in-memory user
//! directory.

use anyhow::Context as _;
use cadenza_core::{
    ActionDeclaration, Container, ControllerDeclaration, Dependency, Error, FieldError,
    ParamSpec, ParamValue, TypeDescriptor, Validate, ValidationErrors,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Controller identifiers exposed by this module
pub const CONTROLLERS: [&str; 2] = ["HealthController", "UserController"];

/// Stored user
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct User {
    /// Identifier
    pub id: u64,
    /// Display name
    pub name: String,
    /// Contact address
    pub email: String,
    /// Free-form labels
    pub tags: Vec<String>,
}

/// Thread-safe in-memory user store
#[derive(Debug)]
pub struct UserRepository {
    users: RwLock<Vec<User>>,
    next_id: AtomicU64,
}

impl UserRepository {
    /// Store with a couple of users already present
    #[must_use]
    pub fn seeded() -> Self {
        let repo = Self {
            users: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        };
        repo.insert(NewUser {
            name: "Ada Lovelace".into(),
            email: "ada@example.com".into(),
            tags: vec!["math".into(), "engines".into()],
        });
        repo.insert(NewUser {
            name: "Grace Hopper".into(),
            email: "grace@example.com".into(),
            tags: vec!["compilers".into()],
        });
        repo
    }

    fn all(&self, limit: Option<usize>) -> Vec<User> {
        let users = self.users.read().unwrap_or_else(|e| e.into_inner());
        users.iter().take(limit.unwrap_or(usize::MAX)).cloned().collect()
    }

    fn find(&self, id: i64) -> Option<User> {
        let users = self.users.read().unwrap_or_else(|e| e.into_inner());
        users.iter().find(|u| i64::try_from(u.id).ok() == Some(id)).cloned()
    }

    fn tagged(&self, tags: &[String]) -> Vec<User> {
        let users = self.users.read().unwrap_or_else(|e| e.into_inner());
        users
            .iter()
            .filter(|u| tags.iter().any(|t| u.tags.contains(t)))
            .cloned()
            .collect()
    }

    fn insert(&self, new: NewUser) -> User {
        let user = User {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            name: new.name,
            email: new.email,
            tags: new.tags,
        };
        let mut users = self.users.write().unwrap_or_else(|e| e.into_inner());
        users.push(user.clone());
        user
    }
}

/// Payload of `POST /users`
#[derive(Debug, Deserialize)]
pub struct NewUser {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    tags: Vec<String>,
}

impl Validate for NewUser {
    fn validate(&self, errors: &mut ValidationErrors) {
        if self.name.trim().is_empty() {
            errors.add_required("name");
        } else if self.name.chars().count() > 64 {
            errors.add(FieldError::too_long("name", 64));
        }
        if self.email.is_empty() {
            errors.add_required("email");
        } else if !self.email.contains('@') {
            errors.add(FieldError::invalid_format("email", "email address"));
        }
    }
}

/// Query of `GET /users`
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    limit: Option<String>,
}

impl Validate for ListQuery {
    fn validate(&self, errors: &mut ValidationErrors) {
        match self.limit.as_deref().map(str::parse::<usize>) {
            Some(Err(_)) => errors.add(FieldError::invalid_type("limit", "an integer")),
            Some(Ok(0)) => errors.add(FieldError::too_small("limit", 1)),
            _ => {}
        }
    }
}

/// Liveness check
#[derive(Debug, Default)]
pub struct HealthController;

/// CRUD-ish access to [`UserRepository`]
#[derive(Debug)]
pub struct UserController {
    repo: Arc<UserRepository>,
}

/// Register the services behind the demo controllers
pub fn register_services(container: &mut Container) {
    container.register(
        TypeDescriptor::class("UserRepository").construct(|_| Ok(UserRepository::seeded())),
    );
    container.set_self("UserRepository");

    container.register(TypeDescriptor::class("HealthController").construct(|_| Ok(HealthController)));
    container.register(
        TypeDescriptor::class("UserController")
            .dependency(Dependency::class("repo", "UserRepository"))
            .construct(|deps| {
                Ok(UserController {
                    repo: deps.service::<UserRepository>(0)?,
                })
            }),
    );
}

/// Route declarations of the demo controllers
///
/// `UserController` has no prefix: a prefix always ends in `/` once joined
/// with an action path, which would put the collection at `/users/`.
pub fn declarations() -> Vec<ControllerDeclaration> {
    vec![
        ControllerDeclaration::new("HealthController").action(
            ActionDeclaration::get("status", "/health")
                .handler(|_: &HealthController, _| Ok(json!({"status": "ok"}))),
        ),
        ControllerDeclaration::new("UserController")
            .action(
                ActionDeclaration::get("index", "/users")
                    .param(ParamSpec::object::<ListQuery>("query").source("query"))
                    .handler(|c: &UserController, mut args| {
                        let query: ListQuery = args.object(0)?;
                        let limit = query.limit.map(|l| l.parse::<usize>()).transpose()?;
                        Ok(c.repo.all(limit))
                    }),
            )
            .action(
                ActionDeclaration::get("show", "/users/{id}")
                    .param(ParamSpec::scalar("id"))
                    .handler(|c: &UserController, args| {
                        let id = args.int(0).map_err(|_| invalid_id())?;
                        Ok(c.repo.find(id).map_or(Value::Null, |u| json!(u)))
                    }),
            )
            .action(
                ActionDeclaration::get("tagged", "/users/tagged/{tags}")
                    .param(ParamSpec::list("tags"))
                    .handler(|c: &UserController, args| {
                        let tags: Vec<String> = args
                            .list(0)?
                            .iter()
                            .map(ParamValue::as_string)
                            .collect();
                        Ok(c.repo.tagged(&tags))
                    }),
            )
            .action(
                ActionDeclaration::post("create", "/users")
                    .param(ParamSpec::object::<NewUser>("user").source("json"))
                    .handler(|c: &UserController, mut args| {
                        let new: NewUser = args.object(0).context("reading new user")?;
                        Ok(c.repo.insert(new))
                    }),
            ),
    ]
}

fn invalid_id() -> anyhow::Error {
    let mut errors = ValidationErrors::new();
    errors.add(FieldError::invalid_type("id", "an integer"));
    Error::Validation(errors).into()
}
