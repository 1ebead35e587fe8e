use super::{BBoxPx, RecognizedWord};

const WORD_LEVEL: i32 = 5;

/// Parse `tesseract ... tsv` output into word records keyed by their native line.
///
/// Only level-5 (word) rows are kept. Rows with empty text, a negative
/// confidence, or a degenerate box are skipped.
pub(super) fn parse_tsv_words(tsv: &str) -> Vec<RecognizedWord> {
    let mut words = Vec::new();

    for (idx, row) in tsv.lines().enumerate() {
        if idx == 0 {
            continue;
        }
        let cols = row.split('\t').collect::<Vec<_>>();
        if cols.len() < 12 {
            continue;
        }
        let level: i32 = cols[0].trim().parse().unwrap_or(0);
        if level != WORD_LEVEL {
            continue;
        }
        let page_num: i32 = cols[1].trim().parse().unwrap_or(0);
        let block_num: i32 = cols[2].trim().parse().unwrap_or(0);
        let par_num: i32 = cols[3].trim().parse().unwrap_or(0);
        let line_num: i32 = cols[4].trim().parse().unwrap_or(0);
        let left: u32 = cols[6].trim().parse().unwrap_or(0);
        let top: u32 = cols[7].trim().parse().unwrap_or(0);
        let width: u32 = cols[8].trim().parse().unwrap_or(0);
        let height: u32 = cols[9].trim().parse().unwrap_or(0);
        let conf: f32 = cols[10].trim().parse().unwrap_or(-1.0);
        // Text may itself contain tabs in malformed output; keep the remainder.
        let text = cols[11..].join("\t");
        let text = text.trim();
        if text.is_empty() || conf < 0.0 || width == 0 || height == 0 {
            continue;
        }

        let bbox = BBoxPx::new(left, top, width, height);
        let confidence = (conf / 100.0).clamp(0.0, 1.0);
        words.push(
            RecognizedWord::new(text, bbox, confidence)
                .with_line_key((page_num, block_num, par_num, line_num)),
        );
    }

    words
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext";

    fn tsv(rows: &[&str]) -> String {
        let mut out = String::from(HEADER);
        for row in rows {
            out.push('\n');
            out.push_str(row);
        }
        out
    }

    #[test]
    fn keeps_only_word_rows_with_keys() {
        let input = tsv(&[
            "1\t1\t0\t0\t0\t0\t0\t0\t800\t600\t-1\t",
            "4\t1\t1\t1\t1\t0\t10\t20\t300\t40\t-1\t",
            "5\t1\t1\t1\t1\t1\t10\t20\t120\t40\t91.5\tStora",
            "5\t1\t1\t1\t1\t2\t140\t22\t170\t38\t88\trabatter",
            "5\t1\t2\t1\t1\t1\t10\t90\t60\t14\t72\tnu",
        ]);
        let words = parse_tsv_words(&input);
        assert_eq!(words.len(), 3);
        assert_eq!(words[0].text, "Stora");
        assert_eq!(words[0].bbox, BBoxPx::new(10, 20, 120, 40));
        assert!((words[0].confidence - 0.915).abs() < 1e-4);
        assert_eq!(words[0].line_key, Some((1, 1, 1, 1)));
        assert_eq!(words[2].line_key, Some((1, 2, 1, 1)));
    }

    #[test]
    fn skips_blank_text_negative_conf_and_empty_boxes() {
        let input = tsv(&[
            "5\t1\t1\t1\t1\t1\t10\t20\t120\t40\t95\t   ",
            "5\t1\t1\t1\t1\t2\t10\t20\t120\t40\t-1\tghost",
            "5\t1\t1\t1\t1\t3\t10\t20\t0\t40\t95\tflat",
            "5\t1\t1\t1\t1\t4\t10\t20\t30\t40\tnope\tbad",
            "garbage row",
        ]);
        assert!(parse_tsv_words(&input).is_empty());
    }
}
