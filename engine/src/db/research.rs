/// Ideas and research documents
///
/// These are the upstream references of a memo artifact: an idea produced by
/// the discovery lane, and the research document the research lane wrote for
/// it.
use anyhow::{Context, Result};
use sdk::types::ArtifactContent;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{from_json_text, now_secs, to_json_text};
use crate::artifacts::AnalysisMap;

/// Investment idea
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Idea {
    pub id: String,
    pub ticker: String,
    pub company: String,
    pub thesis: String,
    /// Prompt id that produced the idea
    pub source: String,
    pub created_at: i64,
}

impl Idea {
    pub fn new(
        ticker: impl Into<String>,
        company: impl Into<String>,
        thesis: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ticker: ticker.into().trim().to_uppercase(),
            company: company.into(),
            thesis: thesis.into(),
            source: source.into(),
            created_at: 0,
        }
    }
}

/// Research document for one idea
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResearchDocument {
    pub id: String,
    pub idea_id: String,
    pub ticker: String,
    pub company: String,
    pub content: ArtifactContent,
    /// One entry per research module
    pub sections: AnalysisMap,
    pub created_at: i64,
}

pub struct ResearchRepository {
    pool: SqlitePool,
}

impl ResearchRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert an idea, stamping its creation time.
    pub async fn insert_idea(&self, idea: &Idea) -> Result<Idea> {
        let now = now_secs()?;

        sqlx::query(
            "INSERT INTO ideas (id, ticker, company, thesis, source, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&idea.id)
        .bind(&idea.ticker)
        .bind(&idea.company)
        .bind(&idea.thesis)
        .bind(&idea.source)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to insert idea")?;

        Ok(Idea {
            created_at: now,
            ..idea.clone()
        })
    }

    pub async fn get_idea(&self, id: &str) -> Result<Option<Idea>> {
        let row = sqlx::query(
            "SELECT id, ticker, company, thesis, source, created_at FROM ideas WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch idea")?;

        Ok(row.map(|r| idea_from_row(&r)))
    }

    /// Tickers that already have an idea
    pub async fn known_tickers(&self) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT DISTINCT ticker FROM ideas ORDER BY ticker")
            .fetch_all(&self.pool)
            .await
            .context("Failed to list known tickers")
    }

    pub async fn insert_research(&self, doc: &ResearchDocument) -> Result<ResearchDocument> {
        let now = now_secs()?;

        sqlx::query(
            "INSERT INTO research_documents (id, idea_id, ticker, company, content, sections, created_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&doc.id)
        .bind(&doc.idea_id)
        .bind(&doc.ticker)
        .bind(&doc.company)
        .bind(to_json_text(&doc.content, "research content")?)
        .bind(to_json_text(&doc.sections, "research sections")?)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to insert research document")?;

        Ok(ResearchDocument {
            created_at: now,
            ..doc.clone()
        })
    }

    pub async fn get_research(&self, id: &str) -> Result<Option<ResearchDocument>> {
        let row = sqlx::query(
            "SELECT id, idea_id, ticker, company, content, sections, created_at FROM research_documents WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch research document")?;

        row.map(|r| research_from_row(&r)).transpose()
    }

    /// Research document plus the idea it came from.
    pub async fn fetch_upstream(&self, research_id: &str) -> Result<Option<(ResearchDocument, Idea)>> {
        let Some(doc) = self.get_research(research_id).await? else {
            return Ok(None);
        };
        let Some(idea) = self.get_idea(&doc.idea_id).await? else {
            return Ok(None);
        };
        Ok(Some((doc, idea)))
    }
}

fn idea_from_row(r: &SqliteRow) -> Idea {
    Idea {
        id: r.get("id"),
        ticker: r.get("ticker"),
        company: r.get("company"),
        thesis: r.get("thesis"),
        source: r.get("source"),
        created_at: r.get("created_at"),
    }
}

fn research_from_row(r: &SqliteRow) -> Result<ResearchDocument> {
    Ok(ResearchDocument {
        id: r.get("id"),
        idea_id: r.get("idea_id"),
        ticker: r.get("ticker"),
        company: r.get("company"),
        content: from_json_text(&r.get::<String, _>("content"), "research content")?,
        sections: from_json_text(&r.get::<String, _>("sections"), "research sections")?,
        created_at: r.get("created_at"),
    })
}
