use crate::id::IdAllocator;
use postboard_common::model::{
    Id,
    post::{Post, PostContent, PostMarker, PostTitle},
};
use thiserror::Error;
use tracing::debug;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, Error)]
pub enum StoreError {
    #[error("No free post id could be allocated")]
    IdSpaceExhausted,
    #[error("Index {index} is out of bounds for a store of {len} posts")]
    IndexOutOfBounds { index: usize, len: usize },
}

/// Ordered collection of posts. Insertion order is preserved, and the last post is
/// the latest one.
pub trait PostStore: Send + Sync {
    fn list_all(&self) -> &[Post];

    fn find_by_id(&self, id: Id<PostMarker>) -> Option<&Post> {
        self.list_all().iter().find(|post| post.id == id)
    }

    fn find_index_by_id(&self, id: Id<PostMarker>) -> Option<usize> {
        self.list_all().iter().position(|post| post.id == id)
    }

    fn latest(&self) -> Option<&Post> {
        self.list_all().last()
    }

    /// Stores `content` under a freshly allocated id at the end of the collection.
    fn append(&mut self, content: PostContent) -> Result<Post>;

    /// Replaces the post at `index` wholesale, keeping its id.
    fn replace_at(&mut self, index: usize, content: PostContent) -> Result<Post>;

    fn remove_at(&mut self, index: usize) -> Result<Post>;
}

pub struct MemoryStore {
    posts: Vec<Post>,
    id_allocator: Box<dyn IdAllocator>,
}

impl MemoryStore {
    #[must_use]
    pub fn new(id_allocator: Box<dyn IdAllocator>) -> Self {
        Self::with_posts(Vec::new(), id_allocator)
    }

    #[must_use]
    pub fn with_posts(posts: Vec<Post>, id_allocator: Box<dyn IdAllocator>) -> Self {
        Self {
            posts,
            id_allocator,
        }
    }

    /// A store holding the two sample posts.
    #[must_use]
    pub fn seeded(id_allocator: Box<dyn IdAllocator>) -> Self {
        Self::with_posts(sample_posts(), id_allocator)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        let len = self.posts.len();
        if index < len {
            Ok(())
        } else {
            Err(StoreError::IndexOutOfBounds { index, len })
        }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("posts", &self.posts)
            .finish_non_exhaustive()
    }
}

impl PostStore for MemoryStore {
    fn list_all(&self) -> &[Post] {
        &self.posts
    }

    fn append(&mut self, content: PostContent) -> Result<Post> {
        let posts = &self.posts;
        let id = self
            .id_allocator
            .allocate(&|id| posts.iter().any(|post| post.id == id))
            .ok_or(StoreError::IdSpaceExhausted)?;

        let post = Post { id, content };
        self.posts.push(post.clone());
        debug!(%id, len = self.posts.len(), "Appended post");

        Ok(post)
    }

    fn replace_at(&mut self, index: usize, content: PostContent) -> Result<Post> {
        self.check_index(index)?;

        let slot = &mut self.posts[index];
        slot.content = content;

        Ok(slot.clone())
    }

    fn remove_at(&mut self, index: usize) -> Result<Post> {
        self.check_index(index)?;

        let post = self.posts.remove(index);
        debug!(id = %post.id, len = self.posts.len(), "Removed post");

        Ok(post)
    }
}

#[must_use]
pub fn sample_posts() -> Vec<Post> {
    (1..=2)
        .map(|n| Post {
            id: Id::new(n),
            content: PostContent::new(
                PostTitle::new(format!("title of post {n}")).unwrap_or_default(),
                format!("content of post {n}"),
            ),
        })
        .collect()
}
