use std::time::*;

use tracing::info;
use tracing_subscriber;

use conjstats::*;

fn main() {
    prepare_logging();

    benchmark_family::<BetaBernoulli>();
    benchmark_family::<GammaPoisson>();
    benchmark_family::<NormalInvChiSq>();
    benchmark_family::<DirichletDiscrete>();
}

/// Times the tight-loop operations an inference driver leans on
fn benchmark_family<M: Model>() {
    let number_values = 100_000;
    let number_draws = 10_000;

    random::seed( 0 );
    let example = M::examples().into_iter().next().expect( "families ship examples" );
    let model = M::model_load( &example.model ).expect( "examples load" );
    let values = model.sample_group( number_values );

    info!( "Start benchmark: {}", M::FAMILY );

    let mut group = model.group_create( Vec::new() ).unwrap();
    let start = Instant::now();
    for value in &values {
	model.group_add_value( &mut group, value ).unwrap();
    }
    info!( "Result: {number_values} adds took {}ms", start.elapsed().as_millis() );

    let start = Instant::now();
    let mut total = 0.0;
    for value in &values {
	total += model.score_value( &group, value ).unwrap();
    }
    info!( "Result: {number_values} predictive scores took {}ms (sum {total:.3})", start.elapsed().as_millis() );

    let scorer = model.scorer_create( Some( &group ));
    let start = Instant::now();
    let mut total = 0.0;
    for value in &values {
	total += model.scorer_eval( &scorer, value ).unwrap();
    }
    info!( "Result: {number_values} scorer evals took {}ms (sum {total:.3})", start.elapsed().as_millis() );

    let start = Instant::now();
    for _ in 0 .. number_draws {
	model.sample_value( &group );
    }
    info!( "Result: {number_draws} posterior draws took {}ms", start.elapsed().as_millis() );

    let start = Instant::now();
    for value in &values {
	model.group_remove_value( &mut group, value ).unwrap();
    }
    info!( "Result: {number_values} removals took {}ms", start.elapsed().as_millis() );
}

fn prepare_logging() {
    let tracer = tracing_subscriber::fmt::fmt()
        .with_max_level( tracing_subscriber::filter::LevelFilter::INFO )
        .finish();
    tracing::subscriber::set_global_default( tracer ).unwrap();
}
