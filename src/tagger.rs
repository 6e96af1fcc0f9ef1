//! External tagger/committer interface (§6.3) — opaque, git-shaped.
//! `GitTagger` is the one concrete implementation the spine ships.

use git2::{Repository, Signature};
use std::path::Path;

pub trait Tagger: Send + Sync {
    fn tag(&self, name: &str) -> anyhow::Result<String>;
    fn commit(&self, message: &str) -> anyhow::Result<String>;
    fn checkout_tag(&self, tag_id: &str) -> anyhow::Result<()>;
}

pub struct GitTagger {
    repo: Repository,
}

impl GitTagger {
    pub fn open(project_dir: &Path) -> anyhow::Result<Self> {
        let repo = Repository::open(project_dir)?;
        Ok(Self { repo })
    }

    fn head_commit(&self) -> Option<git2::Commit<'_>> {
        self.repo.head().ok().and_then(|head| head.peel_to_commit().ok())
    }
}

impl Tagger for GitTagger {
    fn tag(&self, name: &str) -> anyhow::Result<String> {
        let commit_id = self.commit(&format!("[geoffrussy] checkpoint {name}"))?;
        let oid = git2::Oid::from_str(&commit_id)?;
        let target = self.repo.find_object(oid, None)?;
        let sig = Signature::now("geoffrussy", "geoffrussy@localhost")?;
        self.repo.tag(name, &target, &sig, &format!("checkpoint {name}"), false)?;
        Ok(name.to_string())
    }

    fn commit(&self, message: &str) -> anyhow::Result<String> {
        let mut index = self.repo.index()?;
        index.add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)?;
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = self.repo.find_tree(tree_id)?;
        let sig = Signature::now("geoffrussy", "geoffrussy@localhost")?;

        let commit_id = if let Some(parent) = self.head_commit() {
            self.repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?
        } else {
            self.repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[])?
        };
        Ok(commit_id.to_string())
    }

    fn checkout_tag(&self, tag_id: &str) -> anyhow::Result<()> {
        let (object, reference) = self.repo.revparse_ext(tag_id)?;
        self.repo.checkout_tree(&object, None)?;
        match reference {
            Some(gref) => self.repo.set_head(gref.name().unwrap_or("HEAD")),
            None => self.repo.set_head_detached(object.id()),
        }?;
        Ok(())
    }
}
