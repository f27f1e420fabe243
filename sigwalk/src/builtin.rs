//! Profiles for the engine builds this crate knows how to walk.

use std::ops::RangeInclusive;

use sigwalk_image::Image;
use sigwalk_scanner::{cipher, Pattern};

use crate::{Role, Signature, VersionProfile};

const GOBJECTS_V1: &str = "48 8D 05 ? ? ? ? 48 89 01 33 C9 84 D2 41 8B 40 08 49 89 48 10 0F 45 05 ? ? ? ? FF C0 49 89 48 10 41 89 40 08";
const GOBJECTS_V2: &str = "48 8D 05 ? ? ? ? 33 F6 48 89 01 48 89 71 10";
const GOBJECTS_V3: &str = "49 63 C8 48 8D 14 40 48 8B 05 ? ? ? ? 48 8B 0C C8 48 8D 04 D1";

const PROCESS_EVENT_V1: &str = "40 55 56 57 41 54 41 55 41 56 41 57 48 81 EC ? ? ? ? 48 8D 6C 24 ? 48 89 9D ? ? ? ? 48 8B 05 ? ? ? ? 48 33 C5 48 89 85 ? ? ? ? 48 63 41 0C";
const PROCESS_EVENT_V2: &str = "75 ? 4C 8B C6 48 8B D5 48 8B CB E8 ? ? ? ? 48 8B 5C 24";
const PROCESS_EVENT_V3: &str = "40 55 56 57 41 54 41 55 41 56 41 57 48 81 EC ? ? ? ? 48 8D 6C 24 ? 48 89 9D ? ? ? ? 48 8B 05 ? ? ? ? 48 33 C5 48 89 85 ? ? ? ? 8B 41 0C 45 33 F6 3B 05 ? ? ? ? 4D 8B F8 48 8B F2 4C 8B E1 41 B8 ? ? ? ? 7D 2A";
const PROCESS_EVENT_V4: &str = "E8 BF 0B 2A 02 0F B7 1B C1 EB 06 4C 89 36 4C 89 76 08";

const FNAME_TO_STRING: &str = "C3 48 8B 42 18 48 8D 4C 24 30 48 8B D3 48 89 44 24 30 E8 ? ? ? ?";

const GWORLD_V1: &str = "48 89 05 ? ? ? ? 48 8B 8F";
const GWORLD_V2: &str = "48 8B 1D ? ? ? ? 48 85 DB 74 ? 41";
const GWORLD_V3: &str = "48 89 05 ? ? ? ? 48 8B B3";
const GWORLD_V4: &str = "48 8B 1D ? ? ? ? 48 85 DB 74 3B 41";
const GWORLD_V5: &str = "B0 29 D5 AB D6 02 00 00";

#[rustfmt::skip]
const INPUT_KEY_V1: [u8; 87] = [
    0x00, 0x0D, 0x16, 0x0F, 0x7A, 0x19, 0x79, 0x0F, 0x1C, 0x09, 0x06, 0x1F,
    0x78, 0x78, 0x62, 0x76, 0x7C, 0x65, 0x76, 0x7F, 0x68, 0x7D, 0x72, 0x6B,
    0x74, 0x74, 0x6E, 0x79, 0x68, 0x71, 0x63, 0x63, 0x74, 0x61, 0x6E, 0x77,
    0x60, 0x60, 0x7A, 0x6C, 0x6C, 0x7D, 0x6F, 0x67, 0x40, 0x55, 0x5A, 0x43,
    0x5C, 0x5C, 0x46, 0x03, 0x0D, 0x16, 0x05, 0x08, 0x19, 0x0E, 0x0A, 0x1C,
    0x08, 0x08, 0x1F, 0x74, 0x79, 0x62, 0x7B, 0x75, 0x65, 0x03, 0x04, 0x68,
    0x0F, 0x7A, 0x6B, 0x7C, 0x7D, 0x6E, 0x7F, 0x60, 0x71, 0x62, 0x63, 0x74,
    0x61, 0x62, 0x57,
];
#[rustfmt::skip]
const INPUT_KEY_V2: [u8; 75] = [
    0x00, 0x0D, 0x16, 0x0F, 0x7A, 0x19, 0x79, 0x0F, 0x1C, 0x09, 0x06, 0x1F,
    0x78, 0x78, 0x62, 0x76, 0x7C, 0x65, 0x77, 0x77, 0x68, 0x7D, 0x72, 0x6B,
    0x74, 0x74, 0x6E, 0x78, 0x60, 0x71, 0x63, 0x6B, 0x74, 0x61, 0x6E, 0x77,
    0x60, 0x60, 0x7A, 0x6C, 0x64, 0x7D, 0x6C, 0x6F, 0x40, 0x55, 0x53, 0x43,
    0x51, 0x53, 0x46, 0x00, 0x0D, 0x16, 0x0F, 0x09, 0x19, 0x7F, 0x78, 0x1C,
    0x7B, 0x0E, 0x1F, 0x70, 0x71, 0x62, 0x73, 0x74, 0x65, 0x76, 0x77, 0x68,
    0x7D, 0x7E, 0x4B,
];
#[rustfmt::skip]
const INPUT_KEY_V3: [u8; 82] = [
    0x00, 0x0D, 0x16, 0x0F, 0x7A, 0x19, 0x79, 0x0F, 0x1C, 0x09, 0x06, 0x1F,
    0x78, 0x78, 0x62, 0x76, 0x7C, 0x65, 0x77, 0x77, 0x68, 0x7D, 0x72, 0x6B,
    0x74, 0x74, 0x6E, 0x78, 0x68, 0x71, 0x63, 0x6B, 0x74, 0x60, 0x63, 0x77,
    0x6C, 0x68, 0x7A, 0x6E, 0x6A, 0x7D, 0x6A, 0x6E, 0x40, 0x54, 0x55, 0x43,
    0x50, 0x5D, 0x46, 0x0C, 0x71, 0x16, 0x01, 0x00, 0x19, 0x05, 0x1B, 0x08,
    0x05, 0x1E, 0x07, 0x71, 0x61, 0x07, 0x00, 0x64, 0x7A, 0x66, 0x78, 0x68,
    0x76, 0x6A, 0x74, 0x6C, 0x79, 0x7A, 0x6F, 0x60, 0x17, 0x52,
];
#[rustfmt::skip]
const INPUT_KEY_V4: [u8; 78] = [
    0x00, 0x0D, 0x16, 0x0F, 0x7A, 0x19, 0x79, 0x0F, 0x1C, 0x09, 0x06, 0x1F,
    0x78, 0x78, 0x62, 0x76, 0x7C, 0x65, 0x77, 0x77, 0x68, 0x7D, 0x72, 0x6B,
    0x74, 0x74, 0x6E, 0x70, 0x70, 0x60, 0x6A, 0x73, 0x61, 0x60, 0x76, 0x62,
    0x6F, 0x79, 0x6E, 0x6A, 0x7C, 0x68, 0x69, 0x7F, 0x54, 0x59, 0x42, 0x5B,
    0x20, 0x45, 0x50, 0x0C, 0x15, 0x09, 0x17, 0x0C, 0x01, 0x1A, 0x03, 0x0D,
    0x1D, 0x7B, 0x7C, 0x60, 0x7E, 0x62, 0x7C, 0x64, 0x7A, 0x66, 0x78, 0x68,
    0x7D, 0x7E, 0x6B, 0x7C, 0x0B, 0x4E,
];

/// The shipped profiles, oldest first. The last one lists its signatures in a different order;
/// lookups are by role so this does not matter.
pub fn profiles() -> Vec<VersionProfile> {
    use Role::*;

    let legacy = |min, max, input_key: &'static [u8]| {
        VersionProfile::new(
            min,
            max,
            vec![
                Signature::plain(GObjects, GOBJECTS_V1, 3),
                Signature::plain(ProcessEvent, PROCESS_EVENT_V1, 0),
                Signature::plain(FNameToString, FNAME_TO_STRING, 19),
                Signature::plain(GWorld, GWORLD_V1, 3),
                Signature::encrypted(InputKey, input_key, 0),
            ],
        )
    };
    let chunked = |min, max, gworld, input_key: &'static [u8]| {
        VersionProfile::new(
            min,
            max,
            vec![
                Signature::plain(GObjects, GOBJECTS_V3, 10),
                Signature::plain(ProcessEvent, PROCESS_EVENT_V3, 0),
                Signature::plain(FNameToString, FNAME_TO_STRING, 19),
                Signature::plain(GWorld, gworld, 3),
                Signature::encrypted(InputKey, input_key, 0),
            ],
        )
    };

    vec![
        legacy(3700114, 3785438, &INPUT_KEY_V1),
        legacy(3790078, 3876086, &INPUT_KEY_V2),
        legacy(3889387, 4166199, &INPUT_KEY_V2),
        VersionProfile::new(
            4204761,
            4461277,
            vec![
                Signature::plain(GObjects, GOBJECTS_V2, 3),
                Signature::plain(ProcessEvent, PROCESS_EVENT_V2, 12),
                Signature::plain(FNameToString, FNAME_TO_STRING, 19),
                Signature::plain(GWorld, GWORLD_V2, 3),
                Signature::encrypted(InputKey, &INPUT_KEY_V2, 0),
            ],
        ),
        chunked(4464155, 5285981, GWORLD_V3, &INPUT_KEY_V2),
        chunked(5362200, 11586896, GWORLD_V4, &INPUT_KEY_V2),
        chunked(11794982, 13498980, GWORLD_V4, &INPUT_KEY_V3),
        chunked(13649278, 15570449, GWORLD_V4, &INPUT_KEY_V4),
        VersionProfile::new(
            15685441,
            15727376,
            vec![
                Signature::plain(ProcessEvent, PROCESS_EVENT_V4, 0),
                Signature::plain(FNameToString, FNAME_TO_STRING, 19),
                Signature::plain(GWorld, GWORLD_V5, 0),
                Signature::encrypted(InputKey, &INPUT_KEY_V4, 0),
                Signature::plain(GObjects, GOBJECTS_V3, 10),
            ],
        ),
    ]
}

/// Encrypted signature for code that the interaction layer patches. These are resolved on demand
/// and are not part of any profile.
pub struct PatchSite {
    pub name: &'static str,
    pub blob: &'static [u8],
    pub versions: RangeInclusive<i32>,
    /// Offset from the match to the patched byte, if any
    pub patch_offset: Option<usize>,
}

impl PatchSite {
    pub fn text(&self) -> String {
        cipher::decode_to_string(self.blob)
    }

    pub fn pattern(&self) -> Pattern {
        Pattern::new(self.text())
    }

    /// Absolute address of the patched byte, or of the match when nothing is patched
    pub fn resolve(&self, image: &Image<'_>) -> Option<usize> {
        image
            .find(&self.pattern())
            .and_then(|address| address.checked_add(self.patch_offset.unwrap_or_default()))
    }
}

#[rustfmt::skip]
const STATE_PATCH: [u8; 64] = [
    0x00, 0x0D, 0x16, 0x0F, 0x7A, 0x19, 0x79, 0x03, 0x1C, 0x09, 0x06, 0x1F,
    0x78, 0x03, 0x62, 0x77, 0x73, 0x65, 0x75, 0x77, 0x68, 0x7D, 0x72, 0x6B,
    0x7F, 0x74, 0x6E, 0x7E, 0x64, 0x71, 0x11, 0x6B, 0x74, 0x65, 0x10, 0x77,
    0x60, 0x6C, 0x7A, 0x64, 0x7C, 0x62, 0x7E, 0x60, 0x40, 0x5E, 0x42, 0x5B,
    0x54, 0x45, 0x24, 0x71, 0x15, 0x09, 0x17, 0x07, 0x19, 0x05, 0x1B, 0x03,
    0x1D, 0x0E, 0x0C, 0x40,
];
#[rustfmt::skip]
const STATE_PATCH_SECONDARY: [u8; 45] = [
    0x0C, 0x05, 0x16, 0x75, 0x7A, 0x19, 0x05, 0x1B, 0x03, 0x1D, 0x01, 0x1F,
    0x7F, 0x61, 0x72, 0x70, 0x64, 0x72, 0x73, 0x67, 0x77, 0x69, 0x72, 0x09,
    0x6C, 0x75, 0x7D, 0x6F, 0x6F, 0x71, 0x6D, 0x73, 0x6B, 0x75, 0x69, 0x77,
    0x6C, 0x61, 0x7A, 0x63, 0x1E, 0x7D, 0x1D, 0x1D, 0x60,
];
#[rustfmt::skip]
const HOOK_FUNCTION: [u8; 95] = [
    0x00, 0x0D, 0x16, 0x0F, 0x01, 0x19, 0x0F, 0x78, 0x1C, 0x0F, 0x0A, 0x1F,
    0x7F, 0x61, 0x76, 0x7B, 0x64, 0x7D, 0x7F, 0x67, 0x7F, 0x7D, 0x6A, 0x79,
    0x78, 0x6D, 0x71, 0x6F, 0x65, 0x66, 0x72, 0x67, 0x6C, 0x75, 0x6E, 0x64,
    0x78, 0x1C, 0x19, 0x7B, 0x63, 0x7D, 0x6A, 0x67, 0x40, 0x59, 0x20, 0x43,
    0x22, 0x54, 0x46, 0x00, 0x04, 0x16, 0x0F, 0x7A, 0x19, 0x7E, 0x03, 0x1C,
    0x09, 0x06, 0x1F, 0x78, 0x03, 0x62, 0x73, 0x00, 0x65, 0x79, 0x67, 0x77,
    0x69, 0x75, 0x6B, 0x73, 0x6D, 0x7A, 0x77, 0x70, 0x69, 0x10, 0x73, 0x12,
    0x14, 0x76, 0x63, 0x60, 0x79, 0x62, 0x6E, 0x7C, 0x1E, 0x67, 0x5F,
];
#[rustfmt::skip]
const HOOK_DATA: [u8; 84] = [
    0x00, 0x0D, 0x16, 0x0F, 0x7A, 0x19, 0x79, 0x0F, 0x1C, 0x09, 0x06, 0x1F,
    0x78, 0x78, 0x62, 0x76, 0x7C, 0x65, 0x79, 0x67, 0x7C, 0x71, 0x6A, 0x73,
    0x75, 0x6D, 0x79, 0x7F, 0x70, 0x6E, 0x72, 0x67, 0x6C, 0x75, 0x6E, 0x6E,
    0x78, 0x6E, 0x62, 0x7B, 0x63, 0x7D, 0x6B, 0x6A, 0x40, 0x55, 0x5A, 0x43,
    0x5C, 0x21, 0x46, 0x02, 0x0D, 0x16, 0x08, 0x18, 0x0D, 0x02, 0x1B, 0x04,
    0x0C, 0x1E, 0x7A, 0x03, 0x61, 0x7D, 0x63, 0x7B, 0x65, 0x79, 0x67, 0x77,
    0x69, 0x7E, 0x73, 0x6C, 0x75, 0x0C, 0x6F, 0x6F, 0x71, 0x65, 0x15, 0x54,
];

pub const PATCH_SITES: [PatchSite; 4] = [
    PatchSite {
        name: "state_patch",
        blob: &STATE_PATCH,
        versions: 5914491..=14801545,
        patch_offset: Some(23),
    },
    PatchSite {
        name: "state_patch_secondary",
        blob: &STATE_PATCH_SECONDARY,
        versions: 5914491..=14801545,
        patch_offset: Some(6),
    },
    PatchSite {
        name: "hook_function",
        blob: &HOOK_FUNCTION,
        versions: i32::MIN..=i32::MAX,
        patch_offset: None,
    },
    PatchSite {
        name: "hook_data",
        blob: &HOOK_DATA,
        versions: i32::MIN..=i32::MAX,
        patch_offset: None,
    },
];
