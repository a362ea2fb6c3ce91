//! Breed-profile knowledge base
//!
//! Maps a breed name to static physical-trait metadata used to parametrize
//! age-progression prompts. The mapping is an ordered list of
//! (substring-set, profile) rows evaluated first-match-wins: exact breed
//! names come before family terms ("french bulldog" before "bulldog" before
//! "terrier"), and an unmatched name falls through to a generic
//! moderate-growth profile so the pipeline never fails on an unknown breed.

use crate::models::profile::{
    AgeTarget, BreedProfile, BuildClass, CoatType, GrayingPattern, SizeClass,
};

/// One row of the knowledge base.
struct ProfileRule {
    /// Lowercase substrings; any hit selects this row.
    matches: &'static [&'static str],
    size: SizeClass,
    build: BuildClass,
    coat: CoatType,
    graying: GrayingPattern,
    brachycephalic: bool,
    grows_significantly: bool,
}

const fn rule(
    matches: &'static [&'static str],
    size: SizeClass,
    build: BuildClass,
    coat: CoatType,
    graying: GrayingPattern,
    brachycephalic: bool,
    grows_significantly: bool,
) -> ProfileRule {
    ProfileRule {
        matches,
        size,
        build,
        coat,
        graying,
        brachycephalic,
        grows_significantly,
    }
}

/// Ordered most-specific-first. Order is load-bearing.
const RULES: &[ProfileRule] = &[
    // --- exact breed names ---
    rule(&["labrador retriever", "labrador"], SizeClass::Large, BuildClass::Athletic, CoatType::Double, GrayingPattern::EarlyMuzzle, false, true),
    rule(&["golden retriever"], SizeClass::Large, BuildClass::Athletic, CoatType::Silky, GrayingPattern::EarlyMuzzle, false, true),
    rule(&["flat-coated retriever", "chesapeake"], SizeClass::Large, BuildClass::Athletic, CoatType::Double, GrayingPattern::EarlyMuzzle, false, true),
    rule(&["german shepherd", "belgian malinois", "malinois"], SizeClass::Large, BuildClass::Athletic, CoatType::Double, GrayingPattern::EarlyMuzzle, false, true),
    rule(&["french bulldog", "frenchie"], SizeClass::Small, BuildClass::Stocky, CoatType::Smooth, GrayingPattern::LateMuzzle, true, false),
    rule(&["boston terrier"], SizeClass::Small, BuildClass::Stocky, CoatType::Smooth, GrayingPattern::LateMuzzle, true, false),
    rule(&["yorkshire terrier", "yorkie"], SizeClass::Toy, BuildClass::Slender, CoatType::Silky, GrayingPattern::Minimal, false, false),
    rule(&["bull terrier"], SizeClass::Medium, BuildClass::Muscular, CoatType::Smooth, GrayingPattern::LateMuzzle, false, false),
    rule(&["pug"], SizeClass::Toy, BuildClass::Stocky, CoatType::Smooth, GrayingPattern::FullFace, true, false),
    rule(&["shih tzu", "lhasa apso", "pekingese"], SizeClass::Toy, BuildClass::Stocky, CoatType::Silky, GrayingPattern::Minimal, true, false),
    rule(&["boxer"], SizeClass::Large, BuildClass::Muscular, CoatType::Smooth, GrayingPattern::FullFace, true, true),
    rule(&["cavalier king charles", "king charles"], SizeClass::Toy, BuildClass::Slender, CoatType::Silky, GrayingPattern::Minimal, false, false),
    rule(&["great dane"], SizeClass::Giant, BuildClass::Slender, CoatType::Smooth, GrayingPattern::EarlyMuzzle, false, true),
    rule(&["saint bernard", "st. bernard"], SizeClass::Giant, BuildClass::Stocky, CoatType::Double, GrayingPattern::LateMuzzle, false, true),
    rule(&["bernese mountain"], SizeClass::Giant, BuildClass::Stocky, CoatType::Double, GrayingPattern::EarlyMuzzle, false, true),
    rule(&["newfoundland", "leonberger"], SizeClass::Giant, BuildClass::Stocky, CoatType::Double, GrayingPattern::LateMuzzle, false, true),
    rule(&["irish wolfhound", "scottish deerhound"], SizeClass::Giant, BuildClass::Slender, CoatType::Wire, GrayingPattern::FullFace, false, true),
    rule(&["rottweiler"], SizeClass::Large, BuildClass::Muscular, CoatType::Smooth, GrayingPattern::EarlyMuzzle, false, true),
    rule(&["doberman"], SizeClass::Large, BuildClass::Slender, CoatType::Smooth, GrayingPattern::EarlyMuzzle, false, true),
    rule(&["chihuahua"], SizeClass::Toy, BuildClass::Slender, CoatType::Smooth, GrayingPattern::Minimal, false, false),
    rule(&["pomeranian"], SizeClass::Toy, BuildClass::Stocky, CoatType::Double, GrayingPattern::Minimal, false, false),
    rule(&["dachshund"], SizeClass::Small, BuildClass::LongBodied, CoatType::Smooth, GrayingPattern::LateMuzzle, false, false),
    rule(&["corgi"], SizeClass::Small, BuildClass::LongBodied, CoatType::Double, GrayingPattern::LateMuzzle, false, false),
    rule(&["basset hound"], SizeClass::Medium, BuildClass::LongBodied, CoatType::Smooth, GrayingPattern::FullFace, false, false),
    rule(&["beagle"], SizeClass::Small, BuildClass::Athletic, CoatType::Smooth, GrayingPattern::EarlyMuzzle, false, false),
    rule(&["border collie"], SizeClass::Medium, BuildClass::Athletic, CoatType::Double, GrayingPattern::LateMuzzle, false, false),
    rule(&["husky", "malamute", "samoyed"], SizeClass::Large, BuildClass::Athletic, CoatType::Double, GrayingPattern::Minimal, false, true),
    rule(&["greyhound", "whippet", "saluki"], SizeClass::Large, BuildClass::Slender, CoatType::Smooth, GrayingPattern::FullFace, false, true),
    rule(&["pit bull", "staffordshire", "american bully"], SizeClass::Medium, BuildClass::Muscular, CoatType::Smooth, GrayingPattern::LateMuzzle, false, false),
    rule(&["shar pei", "shar-pei"], SizeClass::Medium, BuildClass::Stocky, CoatType::Smooth, GrayingPattern::LateMuzzle, true, false),
    rule(&["chow chow"], SizeClass::Medium, BuildClass::Stocky, CoatType::Double, GrayingPattern::Minimal, true, false),
    rule(&["dalmatian"], SizeClass::Large, BuildClass::Athletic, CoatType::Smooth, GrayingPattern::Minimal, false, true),
    rule(&["akita", "shiba"], SizeClass::Medium, BuildClass::Muscular, CoatType::Double, GrayingPattern::Minimal, false, false),
    rule(&["standard poodle"], SizeClass::Large, BuildClass::Slender, CoatType::Curly, GrayingPattern::Minimal, false, true),
    rule(&["toy poodle", "miniature poodle"], SizeClass::Toy, BuildClass::Slender, CoatType::Curly, GrayingPattern::Minimal, false, false),
    rule(&["schnauzer"], SizeClass::Medium, BuildClass::Athletic, CoatType::Wire, GrayingPattern::FullFace, false, false),
    rule(&["airedale"], SizeClass::Medium, BuildClass::Athletic, CoatType::Wire, GrayingPattern::LateMuzzle, false, false),
    rule(&["english bulldog", "bulldog"], SizeClass::Medium, BuildClass::Stocky, CoatType::Smooth, GrayingPattern::LateMuzzle, true, false),
    rule(&["mastiff", "cane corso", "dogue"], SizeClass::Giant, BuildClass::Muscular, CoatType::Smooth, GrayingPattern::EarlyMuzzle, false, true),
    rule(&["komondor", "puli"], SizeClass::Large, BuildClass::Stocky, CoatType::Corded, GrayingPattern::Minimal, false, true),
    // "poodle" before "poo": a plain Poodle must not land in the cross family
    rule(&["poodle"], SizeClass::Medium, BuildClass::Slender, CoatType::Curly, GrayingPattern::Minimal, false, false),
    // --- designer-cross families ---
    rule(&["doodle", "poo"], SizeClass::Medium, BuildClass::Athletic, CoatType::Curly, GrayingPattern::Minimal, false, true),
    // --- family terms ---
    rule(&["retriever"], SizeClass::Large, BuildClass::Athletic, CoatType::Double, GrayingPattern::EarlyMuzzle, false, true),
    rule(&["shepherd", "collie", "heeler", "cattle dog"], SizeClass::Medium, BuildClass::Athletic, CoatType::Double, GrayingPattern::LateMuzzle, false, false),
    rule(&["spaniel", "setter"], SizeClass::Medium, BuildClass::Athletic, CoatType::Silky, GrayingPattern::EarlyMuzzle, false, false),
    rule(&["pointer", "vizsla", "weimaraner"], SizeClass::Large, BuildClass::Slender, CoatType::Smooth, GrayingPattern::Minimal, false, true),
    rule(&["terrier"], SizeClass::Small, BuildClass::Athletic, CoatType::Wire, GrayingPattern::LateMuzzle, false, false),
    rule(&["hound"], SizeClass::Medium, BuildClass::Slender, CoatType::Smooth, GrayingPattern::FullFace, false, false),
    rule(&["spitz"], SizeClass::Small, BuildClass::Stocky, CoatType::Double, GrayingPattern::Minimal, false, false),
    // --- size qualifiers, for otherwise-unknown names ---
    rule(&["giant"], SizeClass::Giant, BuildClass::Stocky, CoatType::Double, GrayingPattern::LateMuzzle, false, true),
    rule(&["toy", "miniature", "teacup"], SizeClass::Toy, BuildClass::Slender, CoatType::Smooth, GrayingPattern::Minimal, false, false),
];

/// Generic moderate-growth profile for unmatched names.
const FALLBACK: ProfileRule = rule(
    &[],
    SizeClass::Medium,
    BuildClass::Athletic,
    CoatType::Smooth,
    GrayingPattern::LateMuzzle,
    false,
    false,
);

/// Look up the profile for a breed name. Never fails.
pub fn profile(breed_name: &str) -> BreedProfile {
    let lower = breed_name.to_lowercase();
    let matched = RULES
        .iter()
        .find(|r| r.matches.iter().any(|m| lower.contains(m)))
        .unwrap_or(&FALLBACK);
    matched.build_profile()
}

impl ProfileRule {
    fn build_profile(&self) -> BreedProfile {
        BreedProfile {
            size: self.size,
            build: self.build,
            coat: self.coat,
            graying: self.graying,
            brachycephalic: self.brachycephalic,
            grows_significantly: self.grows_significantly,
            body_at_one_year: body_note(self, AgeTarget::OneYear),
            face_at_one_year: face_note(self, AgeTarget::OneYear),
            size_at_one_year: size_note(self, AgeTarget::OneYear),
            body_at_three_years: body_note(self, AgeTarget::ThreeYears),
            face_at_three_years: face_note(self, AgeTarget::ThreeYears),
            size_at_three_years: size_note(self, AgeTarget::ThreeYears),
        }
    }
}

// ============================================================================
// Note construction
// ============================================================================

fn build_word(build: BuildClass) -> &'static str {
    match build {
        BuildClass::Slender => "lean, narrow-chested",
        BuildClass::Athletic => "well-muscled, athletic",
        BuildClass::Muscular => "broad, heavily muscled",
        BuildClass::Stocky => "compact, stocky",
        BuildClass::LongBodied => "long-backed, short-legged",
    }
}

fn coat_word(coat: CoatType) -> &'static str {
    match coat {
        CoatType::Smooth => "short, smooth coat",
        CoatType::Double => "dense double coat",
        CoatType::Wire => "harsh wire coat",
        CoatType::Curly => "tight curly coat",
        CoatType::Silky => "long silky coat",
        CoatType::Corded => "corded coat",
    }
}

fn body_note(rule: &ProfileRule, target: AgeTarget) -> String {
    match target {
        AgeTarget::OneYear => {
            if rule.grows_significantly {
                format!(
                    "Fully grown out of puppy proportions: a {} adult frame with a deep chest, \
                     long legs and no remaining puppy roundness. The {} is fully developed.",
                    build_word(rule.build),
                    coat_word(rule.coat)
                )
            } else {
                format!(
                    "A young adult {} frame; the body has lost its puppy softness but stays \
                     close to the original outline. The {} is fully grown in.",
                    build_word(rule.build),
                    coat_word(rule.coat)
                )
            }
        }
        AgeTarget::ThreeYears => format!(
            "A mature {} adult in physical prime, slightly heavier through the chest and \
             shoulders than at one year. The {} has its full adult texture.",
            build_word(rule.build),
            coat_word(rule.coat)
        ),
    }
}

fn face_note(rule: &ProfileRule, target: AgeTarget) -> String {
    let mut note = match target {
        AgeTarget::OneYear => {
            "An adult head: the muzzle has lengthened out of puppy shape and the eyes sit \
             proportionally smaller in the face."
                .to_string()
        }
        AgeTarget::ThreeYears => {
            "A fully mature head with defined cheekbones and adult jaw musculature.".to_string()
        }
    };

    if rule.brachycephalic {
        note.push_str(
            " Preserve the flat, short-muzzled face exactly; do not lengthen the muzzle.",
        );
    }

    if target == AgeTarget::ThreeYears {
        match rule.graying {
            GrayingPattern::EarlyMuzzle => {
                note.push_str(" A few light gray flecks are beginning around the muzzle.")
            }
            GrayingPattern::FullFace => {
                note.push_str(" Subtle early graying is visible across the muzzle and brow.")
            }
            GrayingPattern::LateMuzzle | GrayingPattern::Minimal => {
                note.push_str(" No visible graying yet.")
            }
        }
    }

    note
}

fn size_note(rule: &ProfileRule, target: AgeTarget) -> String {
    let class = match rule.size {
        SizeClass::Toy => "a toy-sized dog",
        SizeClass::Small => "a small dog",
        SizeClass::Medium => "a medium-sized dog",
        SizeClass::Large => "a large dog",
        SizeClass::Giant => "a giant breed",
    };
    match target {
        AgeTarget::OneYear => {
            if rule.grows_significantly {
                format!(
                    "Full adult height for {}; noticeably larger than a puppy of the same breed.",
                    class
                )
            } else {
                format!("Adult size for {}; only marginally larger than at adolescence.", class)
            }
        }
        AgeTarget::ThreeYears => format!("Full adult stature for {}.", class),
    }
}

// ============================================================================
// Prompt construction
// ============================================================================

/// Assemble the structured instruction payload for one age-progression call.
pub fn aging_prompt(breed: &str, profile: &BreedProfile, target: AgeTarget) -> String {
    let (body, face, size) = match target {
        AgeTarget::OneYear => (
            &profile.body_at_one_year,
            &profile.face_at_one_year,
            &profile.size_at_one_year,
        ),
        AgeTarget::ThreeYears => (
            &profile.body_at_three_years,
            &profile.face_at_three_years,
            &profile.size_at_three_years,
        ),
    };

    format!(
        "Edit this photo of a {breed} to show the same dog at {years} year(s) old.\n\
         Keep the identity, unique markings, pose, background and lighting of the \
         original photo unchanged.\n\
         Body: {body}\n\
         Face: {face}\n\
         Size: {size}\n\
         Render a photorealistic result with no text, borders or watermarks.",
        breed = breed,
        years = target.years(),
        body = body,
        face = face,
        size = size,
    )
}

// ============================================================================
// TESTS
// ============================================================================
