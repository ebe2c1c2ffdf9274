use num_complex::Complex;
use ricom_algorithms::{
    frame_com, DetectorConfig, DetectorMask, Fft2d, FrequencyBand, Kernel, KernelConfig,
    UpdateOffsets,
};
use ricom_core::geometry::ScanGeometry;
use ricom_core::signal::{Frame, FrameData};

#[test]
fn test_kernel_center_is_zero() {
    for k in 0..12 {
        let plain = Kernel::new(KernelConfig::default().with_kernel_size(k).with_rotation(17.0)).unwrap();
        assert_eq!(plain.at(0, 0), Some((0.0, 0.0)), "k={}", k);

        let filtered = Kernel::new(
            KernelConfig::default()
                .with_kernel_size(k)
                .with_rotation(17.0)
                .with_filter(FrequencyBand::new(1.0, 4.0)),
        )
        .unwrap();
        assert_eq!(filtered.at(0, 0), Some((0.0, 0.0)), "filtered k={}", k);
    }
}

#[test]
fn test_fft_round_trip_any_size() {
    for n in [1usize, 3, 5, 7, 8, 11, 15, 16, 21] {
        let fft = Fft2d::new(n);
        let original: Vec<Complex<f64>> = (0..n * n)
            .map(|i| Complex::new(((i * 37) % 11) as f64 - 5.0, 0.0))
            .collect();
        let mut plane = original.clone();
        fft.forward(&mut plane);
        fft.inverse(&mut plane);
        for (a, b) in original.iter().zip(&plane) {
            let tol = 1e-4 * a.re.abs().max(1.0);
            assert!((a.re - b.re).abs() <= tol, "n={} {} vs {}", n, a, b);
            assert!(b.im.abs() <= tol, "n={} imaginary residue {}", n, b.im);
        }
    }
}

#[test]
fn test_kernel_plane_round_trip() {
    let kernel = Kernel::new(KernelConfig::default().with_kernel_size(6).with_rotation(40.0)).unwrap();
    let n = kernel.width();
    let fft = Fft2d::new(n);
    let mut plane: Vec<Complex<f64>> = kernel
        .ky()
        .iter()
        .map(|&v| Complex::new(f64::from(v), 0.0))
        .collect();
    fft.forward(&mut plane);
    fft.inverse(&mut plane);
    for (&a, b) in kernel.ky().iter().zip(&plane) {
        let a = f64::from(a);
        assert!((a - b.re).abs() <= 1e-4 * a.abs().max(1e-3));
    }
}

#[test]
fn test_offsets_stay_inside_image() {
    let scans = [(16usize, 12usize), (9, 9), (20, 7)];
    for (nx, ny) in scans {
        let scan = ScanGeometry::new(nx, ny);
        for k in 0..=nx.min(ny) / 2 {
            let kernel = Kernel::new(KernelConfig::default().with_kernel_size(k)).unwrap();
            let table = UpdateOffsets::new(&kernel, &scan);
            for iy in 0..ny {
                for ix in 0..nx {
                    table.for_each_target(ix, iy, |target, cell| {
                        assert!(target < nx * ny);
                        assert!(cell < kernel.width() * kernel.width());
                        // Target must lie within k columns of the source
                        let tx = target % nx;
                        assert!(tx.abs_diff(ix) <= k);
                    });
                }
            }
        }
    }
}

#[test]
fn test_mask_matches_analytic_annulus() {
    let cases = [(0.0f32, 10.0f32), (5.0, 20.0), (12.0, 40.0)];
    for (inner, outer) in cases {
        let config = DetectorConfig::for_camera(256, 256).with_radii(inner, outer);
        let mask = DetectorMask::new(&config).unwrap();
        let analytic = std::f64::consts::PI * f64::from(outer * outer - inner * inner);
        let rel = (mask.len() as f64 - analytic).abs() / analytic;
        assert!(rel <= 0.01, "radii ({}, {}]: {} vs {:.1}", inner, outer, mask.len(), analytic);
    }
}

#[test]
fn test_single_pixel_com_is_exact() {
    let (w, h) = (32usize, 24usize);
    for (x0, y0) in [(0usize, 0usize), (31, 23), (7, 19), (16, 3)] {
        let mut data = vec![0u32; w * h];
        data[y0 * w + x0] = 1234;
        let frame = Frame::new(w, h, FrameData::U32(data)).unwrap();
        let com = frame_com(&frame).unwrap();
        assert_eq!(com.x, x0 as f32);
        assert_eq!(com.y, y0 as f32);
    }
}
