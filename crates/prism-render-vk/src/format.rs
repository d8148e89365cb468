// SPDX-License-Identifier: CEPL-1.0
//! Format facts the composer and the pipeline factory need: depth/stencil classification and
//! byte sizes of vertex attribute formats.

use ash::vk;

pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::X8_D24_UNORM_PACK32
            | vk::Format::D32_SFLOAT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

pub fn has_stencil(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::S8_UINT
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Size in bytes of one element of a vertex attribute format.
///
/// Panics on formats that are not usable as vertex attributes here (compressed, depth,
/// packed); declaring one is a programmer error.
pub fn format_size(format: vk::Format) -> u32 {
    match format {
        vk::Format::R8_UNORM
        | vk::Format::R8_SNORM
        | vk::Format::R8_UINT
        | vk::Format::R8_SINT => 1,

        vk::Format::R8G8_UNORM
        | vk::Format::R8G8_SNORM
        | vk::Format::R8G8_UINT
        | vk::Format::R8G8_SINT
        | vk::Format::R16_UNORM
        | vk::Format::R16_SNORM
        | vk::Format::R16_UINT
        | vk::Format::R16_SINT
        | vk::Format::R16_SFLOAT => 2,

        vk::Format::R8G8B8_UNORM
        | vk::Format::R8G8B8_SNORM
        | vk::Format::R8G8B8_UINT
        | vk::Format::R8G8B8_SINT => 3,

        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SNORM
        | vk::Format::R8G8B8A8_UINT
        | vk::Format::R8G8B8A8_SINT
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::R16G16_UNORM
        | vk::Format::R16G16_SNORM
        | vk::Format::R16G16_UINT
        | vk::Format::R16G16_SINT
        | vk::Format::R16G16_SFLOAT
        | vk::Format::R32_UINT
        | vk::Format::R32_SINT
        | vk::Format::R32_SFLOAT => 4,

        vk::Format::R16G16B16_UNORM
        | vk::Format::R16G16B16_SNORM
        | vk::Format::R16G16B16_UINT
        | vk::Format::R16G16B16_SINT
        | vk::Format::R16G16B16_SFLOAT => 6,

        vk::Format::R16G16B16A16_UNORM
        | vk::Format::R16G16B16A16_SNORM
        | vk::Format::R16G16B16A16_UINT
        | vk::Format::R16G16B16A16_SINT
        | vk::Format::R16G16B16A16_SFLOAT
        | vk::Format::R32G32_UINT
        | vk::Format::R32G32_SINT
        | vk::Format::R32G32_SFLOAT => 8,

        vk::Format::R32G32B32_UINT
        | vk::Format::R32G32B32_SINT
        | vk::Format::R32G32B32_SFLOAT => 12,

        vk::Format::R32G32B32A32_UINT
        | vk::Format::R32G32B32A32_SINT
        | vk::Format::R32G32B32A32_SFLOAT => 16,

        other => panic!("unsupported vertex attribute format {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_formats_are_recognised() {
        assert!(is_depth_format(vk::Format::D32_SFLOAT));
        assert!(is_depth_format(vk::Format::D24_UNORM_S8_UINT));
        assert!(!is_depth_format(vk::Format::R16G16B16A16_SFLOAT));
        assert!(!is_depth_format(vk::Format::S8_UINT));
    }

    #[test]
    fn stencil_only_for_combined_formats() {
        assert!(has_stencil(vk::Format::D24_UNORM_S8_UINT));
        assert!(!has_stencil(vk::Format::D32_SFLOAT));
    }

    #[test]
    fn float_vector_sizes() {
        assert_eq!(format_size(vk::Format::R32G32_SFLOAT), 8);
        assert_eq!(format_size(vk::Format::R32G32B32_SFLOAT), 12);
        assert_eq!(format_size(vk::Format::R32G32B32A32_SFLOAT), 16);
        assert_eq!(format_size(vk::Format::R8G8B8A8_UNORM), 4);
    }

    #[test]
    #[should_panic(expected = "unsupported vertex attribute format")]
    fn depth_is_not_a_vertex_format() {
        format_size(vk::Format::D32_SFLOAT);
    }
}
