//! Build an in-memory index over three papers and query it both ways.

use paperdex_core::EmbeddingModel;
use paperdex_retrieval::{IndexConfig, Result, SearchContext, SourceRecord};

#[derive(Clone, Debug)]
struct DemoEmbedder;

impl EmbeddingModel for DemoEmbedder {
    fn dim(&self) -> usize {
        16
    }

    async fn embed(&self, text: &str) -> paperdex_core::Result<Vec<f32>> {
        let mut vector = vec![0.0; self.dim()];
        for word in text.split_whitespace() {
            let bucket = word
                .to_lowercase()
                .bytes()
                .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(b as usize));
            vector[bucket % self.dim()] += 1.0;
        }
        Ok(vector)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let ctx = SearchContext::open(IndexConfig::new(), DemoEmbedder).await?;

    let rows = vec![
        SourceRecord::new(
            "https://arxiv.org/abs/2006.11239",
            "Denoising Diffusion Probabilistic Models",
            "Ho, Jain, Abbeel",
        ),
        SourceRecord::new(
            "https://arxiv.org/abs/1609.02907",
            "Semi-Supervised Classification with Graph Convolutional Networks",
            "Kipf, Welling",
        ),
        SourceRecord::new(
            "https://arxiv.org/abs/2112.10752",
            "High-Resolution Image Synthesis with Latent Diffusion Models",
            "Rombach, Blattmann, Lorenz, Esser, Ommer",
        ),
    ];

    let report = ctx.builder().rebuild(&rows).await?;
    println!(
        "indexed {} papers, {} with vectors",
        report.upserted, report.vectors
    );

    let router = ctx.router();
    for mode in ["lexical", "semantic"] {
        println!("-- {mode}");
        for record in router.search("diffusion models", mode, 2).await? {
            println!("{} {}", record.id, record.document.title);
        }
    }

    ctx.close().await;
    Ok(())
}
