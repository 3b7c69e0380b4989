use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.trim().parse::<i64>().map($name)
            }
        }
    };
}

id_newtype!(PostId);
id_newtype!(UserId);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub post_id: PostId,
    pub author_id: UserId,
    pub title: String,
    pub liked: bool,
    pub published: bool,
}

impl Post {
    pub fn new(post_id: PostId, author_id: UserId, title: impl Into<String>) -> Self {
        Self {
            post_id,
            author_id,
            title: title.into(),
            liked: false,
            published: false,
        }
    }

    pub fn patched(&self, patch: &PostPatch) -> Self {
        let mut next = self.clone();
        if let Some(title) = &patch.title {
            next.title = title.clone();
        }
        if let Some(liked) = patch.liked {
            next.liked = liked;
        }
        if let Some(published) = patch.published {
            next.published = published;
        }
        next
    }
}

/// Partial update addressed to one [`Post`]; absent fields are left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostPatch {
    pub post_id: PostId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub liked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<bool>,
}

impl PostPatch {
    pub fn new(post_id: PostId) -> Self {
        Self {
            post_id,
            title: None,
            liked: None,
            published: None,
        }
    }

    pub fn title(post_id: PostId, title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::new(post_id)
        }
    }

    pub fn liked(post_id: PostId, liked: bool) -> Self {
        Self {
            liked: Some(liked),
            ..Self::new(post_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_only_touches_present_fields() {
        let post = Post::new(PostId(1), UserId(2), "draft");
        let patched = post.patched(&PostPatch::title(PostId(1), "final"));
        assert_eq!(patched.title, "final");
        assert!(!patched.liked);

        let liked = patched.patched(&PostPatch::liked(PostId(1), true));
        assert_eq!(liked.title, "final");
        assert!(liked.liked);
    }

    #[test]
    fn ids_parse_from_trimmed_strings() {
        assert_eq!(" 42 ".parse::<PostId>().expect("id"), PostId(42));
        assert!("x".parse::<PostId>().is_err());
        assert_eq!(PostId(7).to_string(), "7");
    }
}
