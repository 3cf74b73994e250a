//! Response payloads for the rate-limited resources.
//!
//! The payload content carries no contract: each fetch returns a freshly
//! generated JSON object shaped loosely like the resource it names.

use async_trait::async_trait;
use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};

use crate::error::Result;

/// The resources served by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Users,
    Posts,
    Comments,
}

impl Resource {
    pub const ALL: [Resource; 3] = [Resource::Users, Resource::Posts, Resource::Comments];

    /// Map a request path to a resource; only exact matches count.
    pub fn from_path(path: &str) -> Option<Self> {
        match path {
            "/users" => Some(Resource::Users),
            "/posts" => Some(Resource::Posts),
            "/comments" => Some(Resource::Comments),
            _ => None,
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            Resource::Users => "/users",
            Resource::Posts => "/posts",
            Resource::Comments => "/comments",
        }
    }
}

/// Supplies the body for an allowed request.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// Whether `path` names a resource this provider can serve.
    fn supports(&self, path: &str) -> bool;

    /// Produce the payload for `path`.
    async fn fetch(&self, path: &str) -> Result<Value>;
}

/// Generates random payloads for `/users`, `/posts` and `/comments`.
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeDataProvider;

#[async_trait]
impl DataProvider for FakeDataProvider {
    fn supports(&self, path: &str) -> bool {
        Resource::from_path(path).is_some()
    }

    async fn fetch(&self, path: &str) -> Result<Value> {
        let resource = Resource::from_path(path).ok_or_else(|| {
            crate::error::QuotaMockError::Provider(format!("unsupported resource: {path}"))
        })?;
        Ok(generate(resource))
    }
}

const FIRST_NAMES: &[&str] = &[
    "Ada", "Grace", "Linus", "Barbara", "Ken", "Margaret", "Dennis", "Frances", "Alan", "Radia",
];
const LAST_NAMES: &[&str] = &[
    "Lovelace", "Hopper", "Torvalds", "Liskov", "Thompson", "Hamilton", "Ritchie", "Allen",
    "Turing", "Perlman",
];
const CITIES: &[&str] = &[
    "Springfield", "Riverton", "Lakeside", "Fairview", "Greenville", "Oakridge", "Brookfield",
];
const STREETS: &[&str] = &["Main St", "Oak Ave", "Pine Rd", "Maple Dr", "Cedar Ln", "Elm St"];
const DOMAINS: &[&str] = &["example.com", "example.org", "mail.test", "corp.test"];
const WORDS: &[&str] = &[
    "lorem", "ipsum", "dolor", "sit", "amet", "consectetur", "adipiscing", "elit", "sed", "do",
    "eiusmod", "tempor", "incididunt", "ut", "labore", "et", "dolore", "magna", "aliqua",
];
const POWERS: &[&str] = &[
    "synergize scalable markets",
    "streamline viral channels",
    "harness robust paradigms",
    "orchestrate seamless niches",
];
const COMPANIES: &[&str] = &["Initech", "Globex", "Umbrella", "Hooli", "Acme", "Vandelay"];

fn pick<R: Rng>(rng: &mut R, items: &[&'static str]) -> &'static str {
    items.choose(rng).copied().unwrap_or_default()
}

fn sentence<R: Rng>(rng: &mut R) -> String {
    let len = rng.gen_range(4..10);
    let text = (0..len).map(|_| pick(rng, WORDS)).collect::<Vec<_>>().join(" ");
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => text,
    }
}

fn paragraph<R: Rng>(rng: &mut R) -> String {
    let count = rng.gen_range(2..=3);
    (0..count).map(|_| sentence(rng)).collect::<Vec<_>>().join(". ")
}

fn email<R: Rng>(rng: &mut R) -> String {
    format!(
        "{}.{}{}@{}",
        pick(rng, FIRST_NAMES).to_lowercase(),
        pick(rng, LAST_NAMES).to_lowercase(),
        rng.gen_range(1..100),
        pick(rng, DOMAINS)
    )
}

fn generate(resource: Resource) -> Value {
    let mut rng = rand::thread_rng();
    match resource {
        Resource::Users => {
            let user_email = email(&mut rng);
            json!({
                "id": rng.gen_range(100..1000),
                "name": format!("{} {}", pick(&mut rng, FIRST_NAMES), pick(&mut rng, LAST_NAMES)),
                "email": user_email,
                "username": user_email,
                "phone": format!(
                    "{:03}-{:03}-{:04}",
                    rng.gen_range(200..1000),
                    rng.gen_range(0..1000),
                    rng.gen_range(0..10000)
                ),
                "website": pick(&mut rng, DOMAINS),
                "address": {
                    "city": pick(&mut rng, CITIES),
                    "street": format!("{} {}", rng.gen_range(1..9999), pick(&mut rng, STREETS)),
                    "zipcode": format!("{:05}", rng.gen_range(0..100000)),
                    "geo": {
                        "lat": format!("{:.6}", rng.gen_range(-90.0..90.0)),
                        "lon": format!("{:.6}", rng.gen_range(-180.0..180.0)),
                    },
                },
                "company": {
                    "name": pick(&mut rng, COMPANIES),
                    "catchPhrase": sentence(&mut rng),
                    "bs": pick(&mut rng, POWERS),
                },
            })
        }
        Resource::Posts => json!({
            "id": rng.gen_range(100000..1000000),
            "userId": rng.gen_range(10000..100000),
            "title": sentence(&mut rng),
            "body": paragraph(&mut rng),
        }),
        Resource::Comments => json!({
            "id": rng.gen_range(100..1000),
            "postId": rng.gen_range(10000..100000),
            "name": sentence(&mut rng),
            "email": email(&mut rng),
            "body": paragraph(&mut rng),
        }),
    }
}
