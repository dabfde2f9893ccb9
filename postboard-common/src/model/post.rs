use crate::model::Id;
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error, Unexpected},
};
use thiserror::Error;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct PostMarker;

/// A stored post. Serializes flat, with the id next to the content fields.
#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize, Serialize)]
pub struct Post {
    pub id: Id<PostMarker>,
    #[serde(flatten)]
    pub content: PostContent,
}

/// Everything about a post the client supplies on create and update.
#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct PostContent {
    pub title: PostTitle,
    pub content: String,
    #[serde(default = "default_published")]
    pub published: bool,
    #[serde(default, alias = "ratings")]
    pub rating: Option<i64>,
}

fn default_published() -> bool {
    true
}

impl PostContent {
    #[must_use]
    pub fn new(title: PostTitle, content: impl Into<String>) -> Self {
        Self {
            title,
            content: content.into(),
            published: default_published(),
            rating: None,
        }
    }
}

impl Default for PostContent {
    fn default() -> Self {
        Self::new(PostTitle::default(), String::new())
    }
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize)]
#[serde(transparent)]
pub struct PostTitle(String);

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The post title is invalid: {0:?}")]
pub struct InvalidPostTitleError(String);

impl PostTitle {
    pub fn new(title: impl Into<String>) -> Result<Self, InvalidPostTitleError> {
        let title = title.into();
        if title.is_empty() {
            Err(InvalidPostTitleError(title))
        } else {
            Ok(PostTitle(title))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Default for PostTitle {
    fn default() -> Self {
        PostTitle("untitled".to_owned())
    }
}

impl<'de> Deserialize<'de> for PostTitle {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        PostTitle::new(inner)
            .map_err(|err| Error::invalid_value(Unexpected::Str(&err.0), &"a non-empty title"))
    }
}

#[cfg(test)]
mod tests {
    use crate::model::{
        Id,
        post::{Post, PostContent, PostTitle},
    };
    use serde_json::json;

    #[test]
    fn content_defaults() {
        let content: PostContent =
            serde_json::from_value(json!({"title": "t", "content": "c"})).unwrap();

        assert_eq!(content.title.get(), "t");
        assert_eq!(content.content, "c");
        assert!(content.published);
        assert_eq!(content.rating, None);
    }

    #[test]
    fn content_accepts_ratings_alias() {
        let content: PostContent = serde_json::from_value(
            json!({"title": "t", "content": "c", "published": false, "ratings": 4}),
        )
        .unwrap();

        assert!(!content.published);
        assert_eq!(content.rating, Some(4));
    }

    #[test]
    fn content_rejects_malformed_input() {
        let rejected = [
            json!({"content": "c"}),
            json!({"title": "t"}),
            json!({"title": "", "content": "c"}),
            json!({"title": 5, "content": "c"}),
            json!({"title": "t", "content": "c", "published": "yes"}),
            json!({"title": "t", "content": "c", "rating": "five"}),
        ];

        for body in rejected {
            assert!(
                serde_json::from_value::<PostContent>(body.clone()).is_err(),
                "{body} should be rejected"
            );
        }
    }

    #[test]
    fn post_serializes_flat() {
        let post = Post {
            id: Id::new(3),
            content: PostContent::new(PostTitle::new("hello").unwrap(), "world"),
        };

        assert_eq!(
            serde_json::to_value(&post).unwrap(),
            json!({
                "id": 3,
                "title": "hello",
                "content": "world",
                "published": true,
                "rating": null,
            })
        );
    }

    #[test]
    fn empty_title_is_invalid() {
        assert!(PostTitle::new("").is_err());
        assert_eq!(PostTitle::new("x").unwrap().into_inner(), "x");
    }
}
