use anyhow::{Context, Result};
use std::path::Path;

/// Characters per chunk window.
pub const CHUNK_SIZE: usize = 1000;

/// Characters shared between consecutive windows within a page.
pub const CHUNK_OVERLAP: usize = 100;

/// A bounded, overlapping window of page text. The unit of embedding and
/// retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    /// 1-based page number in the source document
    pub page: usize,
    /// Char offset of the window within its page
    pub offset: usize,
}

/// Extracted text of one PDF page.
#[derive(Debug, Clone)]
pub struct PageText {
    pub page: usize,
    pub text: String,
}

/// Load the PDF and extract text page by page. Pages whose content streams
/// fail to decode are skipped rather than failing the whole document.
pub fn load_pdf_pages(path: &Path) -> Result<Vec<PageText>> {
    use lopdf::Document;

    let doc = Document::load(path)
        .with_context(|| format!("Failed to parse PDF at {}", path.display()))?;

    let mut pages = Vec::new();
    for (page_num, _page_id) in doc.get_pages() {
        match doc.extract_text(&[page_num]) {
            Ok(text) => {
                if !text.trim().is_empty() {
                    pages.push(PageText {
                        page: page_num as usize,
                        text,
                    });
                }
            }
            Err(e) => {
                tracing::debug!("Failed to extract text from page {}: {}", page_num, e);
            }
        }
    }

    if pages.is_empty() {
        return Err(anyhow::anyhow!(
            "No text extracted from PDF at {}",
            path.display()
        ));
    }

    tracing::info!(
        "Extracted {} pages ({} chars) from {}",
        pages.len(),
        pages.iter().map(|p| p.text.chars().count()).sum::<usize>(),
        path.display()
    );

    Ok(pages)
}

/// Split extracted pages into overlapping windows.
pub fn chunk_pages(pages: &[PageText]) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    for page in pages {
        chunks.extend(chunk_page(page));
    }
    chunks
}

/// Split one page into fixed-size character windows with overlap.
/// Windows never split a UTF-8 code point; offsets count chars, not bytes.
fn chunk_page(page: &PageText) -> Vec<Chunk> {
    let chars: Vec<char> = page.text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let stride = CHUNK_SIZE - CHUNK_OVERLAP;
    let mut chunks = Vec::new();
    let mut start = 0usize;

    loop {
        let end = (start + CHUNK_SIZE).min(chars.len());
        let text: String = chars[start..end].iter().collect();
        if !text.trim().is_empty() {
            chunks.push(Chunk {
                text,
                page: page.page,
                offset: start,
            });
        }

        if end == chars.len() {
            break;
        }
        start += stride;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(text: &str) -> PageText {
        PageText {
            page: 1,
            text: text.to_string(),
        }
    }

    #[test]
    fn short_page_yields_single_chunk() {
        let chunks = chunk_page(&page("a short page"));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "a short page");
        assert_eq!(chunks[0].page, 1);
        assert_eq!(chunks[0].offset, 0);
    }

    #[test]
    fn windows_are_bounded_and_overlap() {
        let text: String = std::iter::repeat('x').take(2500).collect();
        let chunks = chunk_page(&page(&text));

        // stride 900: offsets 0, 900, 1800 cover 2500 chars
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.text.chars().count() <= CHUNK_SIZE));
        assert_eq!(chunks[0].offset, 0);
        assert_eq!(chunks[1].offset, 900);
        assert_eq!(chunks[2].offset, 1800);
        // final partial window
        assert_eq!(chunks[2].text.chars().count(), 700);
    }

    #[test]
    fn consecutive_windows_share_the_overlap() {
        let text: String = (0..2000)
            .map(|i| char::from_u32('a' as u32 + (i % 26) as u32).unwrap())
            .collect();
        let chunks = chunk_page(&page(&text));
        assert!(chunks.len() >= 2);

        let first: Vec<char> = chunks[0].text.chars().collect();
        let second: Vec<char> = chunks[1].text.chars().collect();
        let tail: String = first[first.len() - CHUNK_OVERLAP..].iter().collect();
        let head: String = second[..CHUNK_OVERLAP].iter().collect();
        assert_eq!(tail, head);
    }

    #[test]
    fn chunking_is_utf8_safe() {
        let text: String = std::iter::repeat('é').take(1500).collect();
        let chunks = chunk_page(&page(&text));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text.chars().count(), CHUNK_SIZE);
    }

    #[test]
    fn expected_chunk_count_for_document_length() {
        // count ≈ length / (size - overlap), final partial window included
        let text: String = std::iter::repeat('y').take(10_000).collect();
        let chunks = chunk_page(&page(&text));
        let stride = CHUNK_SIZE - CHUNK_OVERLAP;
        let expected = 10_000usize.div_ceil(stride);
        assert!(chunks.len() == expected || chunks.len() == expected + 1);
    }

    #[test]
    fn whitespace_only_windows_are_dropped() {
        let chunks = chunk_page(&page("   \n\t  "));
        assert!(chunks.is_empty());
    }

    #[test]
    fn chunks_carry_their_source_page() {
        let pages = vec![
            PageText {
                page: 1,
                text: "first page text".to_string(),
            },
            PageText {
                page: 2,
                text: "second page text".to_string(),
            },
        ];
        let chunks = chunk_pages(&pages);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].page, 1);
        assert_eq!(chunks[1].page, 2);
    }
}
