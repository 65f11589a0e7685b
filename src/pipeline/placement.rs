//! Image placement resolver: binds processed images to their instructions
//! and computes the final image order.
//!
//! Reading order of the resolved article:
//! top images → for each block: the block, its inline images, its middle
//! images → bottom images → images nobody asked for.
//!
//! Pure and idempotent: identical inputs give identical positions.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::model::{ImagePosition, ProcessedImage, Warning};
use crate::pipeline::Outcome;
use crate::pipeline::aggregator::SourcedInstruction;

/// Where an image sits relative to the content blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "anchor", content = "block", rename_all = "snake_case")]
pub enum Anchor {
    Top,
    AfterBlock(usize),
    Bottom,
}

/// A resolved image and its anchor.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedImage {
    pub image: ProcessedImage,
    pub anchor: Anchor,
}

/// Final image order; `images[i].image.position == i`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImagePlan {
    pub images: Vec<PlacedImage>,
}

impl ImagePlan {
    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Images anchored at `anchor`, in order.
    pub fn at(&self, anchor: Anchor) -> impl Iterator<Item = &ProcessedImage> {
        self.images
            .iter()
            .filter(move |p| p.anchor == anchor)
            .map(|p| &p.image)
    }

    pub fn into_images(self) -> Vec<ProcessedImage> {
        self.images.into_iter().map(|p| p.image).collect()
    }
}

/// An image waiting for a slot.
struct Candidate {
    image: ProcessedImage,
    priority: i32,
    order: usize,
}

impl Candidate {
    fn sort(bucket: &mut [Candidate]) {
        bucket.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.order.cmp(&b.order)));
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ImagePlacementResolver;

impl ImagePlacementResolver {
    /// Resolve placement for `images` against `instructions`.
    ///
    /// `block_emails` is the source email of every content block, in block
    /// order. Instructions are matched by case-insensitive exact file name;
    /// each instruction binds at most one image, the first unbound one.
    pub fn resolve(
        &self,
        block_emails: &[&str],
        instructions: &[SourcedInstruction],
        images: &[ProcessedImage],
    ) -> Outcome<ImagePlan> {
        let mut warnings = Vec::new();
        let mut bound = vec![false; images.len()];

        let mut top = Vec::new();
        let mut middle = Vec::new();
        let mut bottom = Vec::new();
        let mut inline: Vec<Vec<Candidate>> = (0..block_emails.len()).map(|_| Vec::new()).collect();

        let mut ordered: Vec<&SourcedInstruction> = instructions.iter().collect();
        ordered.sort_by_key(|i| i.order);

        for sourced in ordered {
            let name = sourced.instruction.image_name.trim();
            let Some(idx) = images
                .iter()
                .enumerate()
                .position(|(i, img)| !bound[i] && img.matches_name(name))
            else {
                warnings.push(Warning::UnmatchedInstruction {
                    email_id: sourced.email_id.clone(),
                    image_name: name.to_string(),
                });
                continue;
            };
            bound[idx] = true;

            let candidate = Candidate {
                image: images[idx].clone(),
                priority: sourced.instruction.priority,
                order: sourced.order,
            };

            match sourced.instruction.position {
                ImagePosition::Top => top.push(candidate),
                ImagePosition::Middle if !block_emails.is_empty() => middle.push(candidate),
                ImagePosition::Middle | ImagePosition::Bottom => bottom.push(candidate),
                ImagePosition::Inline => {
                    match block_emails.iter().rposition(|e| *e == sourced.email_id) {
                        Some(block) => inline[block].push(candidate),
                        None => {
                            warnings.push(Warning::InlineWithoutBlock {
                                email_id: sourced.email_id.clone(),
                                image_id: candidate.image.id.clone(),
                            });
                            bottom.push(candidate);
                        }
                    }
                }
            }
        }

        Candidate::sort(&mut top);
        Candidate::sort(&mut middle);
        Candidate::sort(&mut bottom);
        for bucket in &mut inline {
            Candidate::sort(bucket);
        }

        let mut after_block: Vec<Vec<ProcessedImage>> = inline
            .into_iter()
            .map(|bucket| bucket.into_iter().map(|c| c.image).collect())
            .collect();
        let middle_count = middle.len();
        for (i, candidate) in middle.into_iter().enumerate() {
            let block = middle_anchor(i, block_emails.len(), middle_count);
            after_block[block].push(candidate.image);
        }

        let mut placed: Vec<PlacedImage> = Vec::with_capacity(images.len());
        placed.extend(top.into_iter().map(|c| PlacedImage {
            image: c.image,
            anchor: Anchor::Top,
        }));
        for (block, bucket) in after_block.into_iter().enumerate() {
            placed.extend(bucket.into_iter().map(|image| PlacedImage {
                image,
                anchor: Anchor::AfterBlock(block),
            }));
        }
        placed.extend(bottom.into_iter().map(|c| PlacedImage {
            image: c.image,
            anchor: Anchor::Bottom,
        }));

        // Fail-open: unclaimed images go last, in input order.
        for (idx, image) in images.iter().enumerate() {
            if bound[idx] {
                continue;
            }
            warnings.push(Warning::UnmatchedImage {
                image_id: image.id.clone(),
                name: image.original_name.clone(),
            });
            placed.push(PlacedImage {
                image: image.clone(),
                anchor: Anchor::Bottom,
            });
        }

        // Top images come first, so slot 0 is either the highest-priority top
        // image or the first image overall.
        for (slot, p) in placed.iter_mut().enumerate() {
            p.image.position = slot;
            p.image.is_featured = slot == 0;
            debug!(image_id = %p.image.id, slot, anchor = ?p.anchor, "Placed image");
        }

        for warning in &warnings {
            warn!(%warning, "Placement warning");
        }
        info!(
            images = placed.len(),
            blocks = block_emails.len(),
            "Resolved image placement"
        );

        Outcome::new(ImagePlan { images: placed }, warnings)
    }
}

/// Block after which the `i`-th middle image goes.
///
/// Images are spaced `ceil(blocks / middle_count)` blocks apart, each
/// centred in its span and clamped to the last block.
fn middle_anchor(i: usize, block_count: usize, middle_count: usize) -> usize {
    let spacing = block_count.div_ceil(middle_count.max(1)).max(1);
    (i * spacing + (spacing - 1) / 2).min(block_count.saturating_sub(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ImageInstruction;

    fn image(name: &str) -> ProcessedImage {
        ProcessedImage {
            id: format!("id-{name}"),
            original_name: format!("{name}.jpg"),
            processed_name: format!("{name}_web.jpg"),
            path: format!("out/{name}_web.jpg"),
            size: 10,
            width: 800,
            height: 600,
            position: 99,
            is_featured: true,
            alt_text: None,
            caption: None,
        }
    }

    fn instr(email: &str, name: &str, position: ImagePosition, priority: i32, order: usize) -> SourcedInstruction {
        SourcedInstruction {
            email_id: email.into(),
            instruction: ImageInstruction {
                image_name: format!("{name}.JPG"),
                instruction: String::new(),
                position,
                priority,
            },
            order,
        }
    }

    fn ids(plan: &ImagePlan) -> Vec<&str> {
        plan.images.iter().map(|p| p.image.id.as_str()).collect()
    }

    #[test]
    fn top_orders_by_priority_then_instruction_order() {
        let images = vec![image("a"), image("b"), image("c")];
        let instructions = vec![
            instr("e1", "a", ImagePosition::Top, 1, 0),
            instr("e1", "b", ImagePosition::Top, 5, 1),
            instr("e1", "c", ImagePosition::Top, 5, 2),
        ];
        let outcome = ImagePlacementResolver.resolve(&["e1"], &instructions, &images);
        assert_eq!(ids(&outcome.value), vec!["id-b", "id-c", "id-a"]);
        assert!(outcome.value.images[0].image.is_featured);
        assert_eq!(
            outcome.value.images.iter().filter(|p| p.image.is_featured).count(),
            1
        );
    }

    #[test]
    fn positions_are_dense_and_zero_based() {
        let images = vec![image("a"), image("b"), image("c"), image("d")];
        let instructions = vec![
            instr("e1", "a", ImagePosition::Bottom, 0, 0),
            instr("e1", "b", ImagePosition::Inline, 0, 1),
            instr("e2", "c", ImagePosition::Middle, 0, 2),
        ];
        let outcome = ImagePlacementResolver.resolve(&["e1", "e2"], &instructions, &images);
        for (slot, placed) in outcome.value.images.iter().enumerate() {
            assert_eq!(placed.image.position, slot);
        }
        assert_eq!(ids(&outcome.value), vec!["id-b", "id-c", "id-a", "id-d"]);
    }

    #[test]
    fn inline_follows_its_email_block() {
        let images = vec![image("x")];
        let instructions = vec![instr("e2", "x", ImagePosition::Inline, 0, 0)];
        let outcome = ImagePlacementResolver.resolve(&["e1", "e2", "e3"], &instructions, &images);
        assert_eq!(outcome.value.images[0].anchor, Anchor::AfterBlock(1));
        // No top image: first image overall is featured.
        assert!(outcome.value.images[0].image.is_featured);
    }

    #[test]
    fn inline_without_block_falls_to_bottom() {
        let images = vec![image("x")];
        let instructions = vec![instr("ghost", "x", ImagePosition::Inline, 0, 0)];
        let outcome = ImagePlacementResolver.resolve(&["e1"], &instructions, &images);
        assert_eq!(outcome.value.images[0].anchor, Anchor::Bottom);
        assert!(matches!(
            outcome.warnings.as_slice(),
            [Warning::InlineWithoutBlock { .. }]
        ));
    }

    #[test]
    fn middle_images_spread_across_blocks() {
        let images = vec![image("m1"), image("m2")];
        let instructions = vec![
            instr("e1", "m1", ImagePosition::Middle, 1, 0),
            instr("e1", "m2", ImagePosition::Middle, 2, 1),
        ];
        let blocks = ["b0", "b1", "b2", "b3", "b4"];
        let outcome = ImagePlacementResolver.resolve(&blocks, &instructions, &images);
        // spacing = ceil(5 / 2) = 3, centred: blocks 1 and 4; m2 has higher priority.
        assert_eq!(ids(&outcome.value), vec!["id-m2", "id-m1"]);
        assert_eq!(outcome.value.images[0].anchor, Anchor::AfterBlock(1));
        assert_eq!(outcome.value.images[1].anchor, Anchor::AfterBlock(4));
    }

    #[test]
    fn more_middle_images_than_blocks_clamp_to_last() {
        let images = vec![image("a"), image("b"), image("c")];
        let instructions = vec![
            instr("e1", "a", ImagePosition::Middle, 0, 0),
            instr("e1", "b", ImagePosition::Middle, 0, 1),
            instr("e1", "c", ImagePosition::Middle, 0, 2),
        ];
        let outcome = ImagePlacementResolver.resolve(&["b0", "b1"], &instructions, &images);
        let anchors: Vec<_> = outcome.value.images.iter().map(|p| p.anchor).collect();
        assert_eq!(
            anchors,
            vec![Anchor::AfterBlock(0), Anchor::AfterBlock(1), Anchor::AfterBlock(1)]
        );
    }

    #[test]
    fn unmatched_image_appended_last_with_warning() {
        let images = vec![image("stray"), image("b")];
        let instructions = vec![instr("e1", "b", ImagePosition::Bottom, -100, 0)];
        let outcome = ImagePlacementResolver.resolve(&["e1"], &instructions, &images);
        assert_eq!(ids(&outcome.value), vec!["id-b", "id-stray"]);
        assert!(matches!(
            outcome.warnings.as_slice(),
            [Warning::UnmatchedImage { image_id, .. }] if image_id == "id-stray"
        ));
    }

    #[test]
    fn unmatched_instruction_warns() {
        let outcome = ImagePlacementResolver.resolve(
            &["e1"],
            &[instr("e1", "missing", ImagePosition::Top, 0, 0)],
            &[],
        );
        assert!(outcome.value.is_empty());
        assert!(matches!(
            outcome.warnings.as_slice(),
            [Warning::UnmatchedInstruction { .. }]
        ));
    }

    #[test]
    fn matches_processed_name() {
        let images = vec![image("a")];
        let mut instruction = instr("e1", "a", ImagePosition::Top, 0, 0);
        instruction.instruction.image_name = "A_WEB.jpg".into();
        let outcome = ImagePlacementResolver.resolve(&["e1"], &[instruction], &images);
        assert_eq!(outcome.value.images[0].anchor, Anchor::Top);
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn resolution_is_idempotent() {
        let images = vec![image("a"), image("b"), image("c")];
        let instructions = vec![
            instr("e1", "c", ImagePosition::Top, 3, 0),
            instr("e2", "a", ImagePosition::Middle, 1, 1),
        ];
        let first = ImagePlacementResolver.resolve(&["e1", "e2"], &instructions, &images);
        let second = ImagePlacementResolver.resolve(&["e1", "e2"], &instructions, &images);
        assert_eq!(first.value, second.value);
    }

    #[test]
    fn no_images_no_featured() {
        let outcome = ImagePlacementResolver.resolve(&["e1"], &[], &[]);
        assert!(outcome.value.is_empty());
        assert!(outcome.warnings.is_empty());
    }
}
