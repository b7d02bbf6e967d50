use eivboot::prelude::*;
use eyre::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;

#[test]
fn test_draw_of_hundred_points() -> Result<()> {
    let sampler = BlockBootstrap::new(100)?;
    assert_eq!(sampler.block_length(), 3);
    assert_eq!(sampler.nblocks(), 33);

    let mut rng = StdRng::seed_from_u64(1);
    for _ in 0..50 {
        let draw = sampler.draw(&mut rng);
        assert_eq!(draw.len(), 99);
        assert!(draw.indices.iter().all(|&i| i < 100));
        assert_eq!(draw.counts.iter().sum::<usize>(), 99);
        assert!(draw.unique.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(draw.unique.len(), draw.counts.len());
    }
    Ok(())
}

#[test]
fn test_same_seed_same_draws() -> Result<()> {
    let sampler = BlockBootstrap::new(40)?;
    let mut a = StdRng::seed_from_u64(347);
    let mut b = StdRng::seed_from_u64(347);
    for _ in 0..10 {
        assert_eq!(sampler.draw(&mut a), sampler.draw(&mut b));
    }
    Ok(())
}

#[test]
fn test_resample_follows_draw() -> Result<()> {
    let x = ndarray::array![300.0, 310.0, 320.0, 330.0, 340.0, 350.0];
    let series = Series::new(
        x.clone(),
        &x * 0.01,
        ndarray::array![0.0, 0.1, 0.2, 0.3, 0.4, 0.5],
        ndarray::Array1::from_elem(6, 0.1),
    )?;
    let sampler = BlockBootstrap::new(series.len())?;
    let mut rng = StdRng::seed_from_u64(3);
    let draw = sampler.draw(&mut rng);

    let data = series.resample(&draw.unique, &draw.counts);
    assert_eq!(data.len(), draw.unique.len());
    assert_eq!(data.counts.sum() as usize, draw.len());
    for (k, &i) in draw.unique.iter().enumerate() {
        assert_eq!(data.x[k], series.x()[i]);
        assert_eq!(data.y[k], series.y()[i]);
    }
    Ok(())
}

#[test]
fn test_read_series_fixture() -> Result<()> {
    let series = Series::read(
        "tests/fixtures/co2.csv",
        "tests/fixtures/temperature.csv",
        true,
    )?;
    assert_eq!(series.len(), 12);
    assert_eq!(series.reference(), 285.2);
    assert_eq!(series.dy()[11], 0.05);
    assert_eq!(series.forcing()[0], 0.0);
    Ok(())
}
